#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(program) = fencer_model::Program::from_json(s) {
            let config = fencer_mc::EngineConfig {
                max_steps: 1_000,
                max_stored: 1_000,
                max_time_secs: 2,
                ..fencer_mc::EngineConfig::default()
            };
            for model in fencer_model::MemoryModel::ALL {
                let common = std::sync::Arc::new(fencer_mc::Common::new(
                    std::sync::Arc::new(program.clone()),
                    model,
                ));
                if let Ok(fencer_mc::Verdict::Reachable { witness, .. }) =
                    fencer_mc::Engine::new(common, config.clone()).run()
                {
                    assert!(fencer_mc::replay(&program, model, &witness).is_ok());
                }
            }
        }
    }
});
