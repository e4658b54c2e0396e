//! Symbolic pending-write sequences.
//!
//! A channel is an alternation `g0 w1 g1 ... wk gk` of gaps and tracked
//! writes, oldest first. A tracked write `wi` is a label with a non-empty set
//! of admissible values. A gap `gi` stands for any (possibly empty) sequence
//! of writes whose labels lie in the gap, with any values. Store buffers use
//! location ids as labels, propagation queues use writer pids.

use fencer_model::{LocSet, ValueSet};
use smallvec::{smallvec, SmallVec};
use std::fmt;

/// A location id (store buffers) or a writer pid (propagation queues).
pub type Label = usize;
/// Labels share the 64-wide bitset used for locations.
pub type LabelSet = LocSet;

/// A pending write whose position in the channel is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tracked {
    pub label: Label,
    pub values: ValueSet,
}

/// Outcome of looking for the newest entry with some label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    /// The entry is pending in the channel (tracked or newly split out of a gap).
    Pending(Channel),
    /// No entry with the label is pending; the reader looks further down.
    Behind(Channel),
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Channel {
    gaps: SmallVec<[LabelSet; 4]>,
    writes: SmallVec<[Tracked; 3]>,
}

impl Channel {
    /// Any sequence of writes with labels in `scope`.
    pub fn any(scope: LabelSet) -> Self {
        Self {
            gaps: smallvec![scope],
            writes: SmallVec::new(),
        }
    }

    /// Only the empty sequence.
    pub fn empty() -> Self {
        Self::any(LabelSet::EMPTY)
    }

    pub fn gaps(&self) -> &[LabelSet] {
        &self.gaps
    }

    pub fn tracked(&self) -> &[Tracked] {
        &self.writes
    }

    /// Whether the empty sequence is among the denoted ones.
    pub fn admits_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Number of tracked writes carrying `label`.
    pub fn count(&self, label: Label) -> usize {
        self.writes.iter().filter(|w| w.label == label).count()
    }

    fn last_gap(&self) -> LabelSet {
        self.gaps[self.gaps.len() - 1]
    }

    /// Predecessors of removing the newest entry, `label`, from the tail.
    /// Each comes with the values the removed entry must carry, or `None`
    /// when the entry was absorbed by the last gap.
    pub fn pop_tail(&self, label: Label) -> SmallVec<[(Channel, Option<ValueSet>); 2]> {
        let mut out = SmallVec::new();
        if let Some(last) = self.writes.last() {
            if last.label == label {
                let mut pre = self.clone();
                pre.gaps.pop();
                pre.writes.pop();
                out.push((pre, Some(last.values)));
            }
        }
        if self.last_gap().contains(label) {
            out.push((self.clone(), None));
        }
        out
    }

    /// Whether some denoted sequence ends in `label := value`.
    pub fn may_end_with(&self, label: Label, value: u32) -> bool {
        self.last_gap().contains(label)
            || self
                .writes
                .last()
                .map_or(false, |w| w.label == label && w.values.contains(value))
    }

    /// Predecessors of appending `label := value` at the tail.
    pub fn append_pre(&self, label: Label, value: u32) -> SmallVec<[Channel; 2]> {
        self.pop_tail(label)
            .into_iter()
            .filter(|(_, values)| values.map_or(true, |vs| vs.contains(value)))
            .map(|(pre, _)| pre)
            .collect()
    }

    /// Case split on where the newest entry with `label` sits, given that its
    /// value must lie in `values`.
    pub fn view_pre(&self, label: Label, values: ValueSet) -> SmallVec<[View; 4]> {
        let mut out = SmallVec::new();
        let k = self.writes.len();
        let newest = self.writes.iter().rposition(|w| w.label == label);

        let start = match newest {
            Some(i) => {
                let seen = self.writes[i].values.intersect(values);
                if !seen.is_empty() {
                    let mut pre = self.clone();
                    pre.writes[i].values = seen;
                    for g in &mut pre.gaps[i + 1..] {
                        *g = g.without(label);
                    }
                    out.push(View::Pending(pre));
                }
                i + 1
            }
            None => 0,
        };

        // The newest entry hides in a gap at or after the newest tracked one.
        for j in start..=k {
            if !self.gaps[j].contains(label) {
                continue;
            }
            let mut gaps = SmallVec::with_capacity(k + 2);
            gaps.extend_from_slice(&self.gaps[..=j]);
            gaps.push(self.gaps[j].without(label));
            gaps.extend(self.gaps[j + 1..].iter().map(|g| g.without(label)));
            let mut writes = SmallVec::with_capacity(k + 1);
            writes.extend_from_slice(&self.writes[..j]);
            writes.push(Tracked { label, values });
            writes.extend_from_slice(&self.writes[j..]);
            out.push(View::Pending(Channel { gaps, writes }));
        }

        if newest.is_none() {
            out.push(View::Behind(Channel {
                gaps: self.gaps.iter().map(|g| g.without(label)).collect(),
                writes: self.writes.clone(),
            }));
        }
        out
    }

    /// Reinstate a committed entry as the oldest pending one.
    pub fn uncommit_head(&self, label: Label, values: ValueSet) -> Channel {
        let mut gaps = SmallVec::with_capacity(self.gaps.len() + 1);
        gaps.push(LabelSet::EMPTY);
        gaps.extend_from_slice(&self.gaps);
        let mut writes = SmallVec::with_capacity(self.writes.len() + 1);
        writes.push(Tracked { label, values });
        writes.extend_from_slice(&self.writes);
        Channel { gaps, writes }
    }

    /// Reinstate any number of committed `label` entries, values unknown,
    /// ahead of everything pending.
    pub fn absorb_head(&self, label: Label) -> Channel {
        let mut pre = self.clone();
        pre.gaps[0] = pre.gaps[0].with(label);
        pre
    }

    /// Whether every sequence denoted by `self` is denoted by `other`.
    ///
    /// Matches `other`'s tracked writes, in order, against tracked writes of
    /// `self` with the same label and included values; everything of `self`
    /// between two matched writes must fit the gap of `other` between them.
    pub fn entails(&self, other: &Channel) -> bool {
        if self == other {
            return true;
        }
        let (k, m) = (self.writes.len(), other.writes.len());
        if m > k {
            return false;
        }
        let mut memo = vec![None; (m + 1) * (k + 1)];
        self.embed(other, 0, 0, &mut memo)
    }

    fn embed(&self, other: &Channel, j: usize, pos: usize, memo: &mut [Option<bool>]) -> bool {
        let k = self.writes.len();
        let key = j * (k + 1) + pos;
        if let Some(known) = memo[key] {
            return known;
        }
        let result = if j == other.writes.len() {
            self.fits(pos, k, other.gaps[j])
        } else {
            let target = other.writes[j];
            let mut found = false;
            for i in pos + 1..=k {
                let w = self.writes[i - 1];
                if w.label == target.label
                    && w.values.is_subset(target.values)
                    && self.fits(pos, i - 1, other.gaps[j])
                    && self.embed(other, j + 1, i, memo)
                {
                    found = true;
                    break;
                }
            }
            found
        };
        memo[key] = Some(result);
        result
    }

    /// Gaps `from..=to` and the tracked writes between them all fit `allowed`.
    fn fits(&self, from: usize, to: usize, allowed: LabelSet) -> bool {
        self.gaps[from..=to].iter().all(|g| g.is_subset(allowed))
            && self.writes[from..to]
                .iter()
                .all(|w| allowed.contains(w.label))
    }

    /// Shape and scope invariant of a channel.
    pub fn is_consistent(&self, scope: LabelSet) -> bool {
        self.gaps.len() == self.writes.len() + 1
            && self.gaps.iter().all(|g| g.is_subset(scope))
            && self
                .writes
                .iter()
                .all(|w| scope.contains(w.label) && !w.values.is_empty())
    }

    /// Render with caller-supplied label names.
    pub fn render(&self, name: &dyn Fn(Label) -> String) -> String {
        let mut parts = Vec::with_capacity(self.gaps.len() + self.writes.len());
        for (i, gap) in self.gaps.iter().enumerate() {
            if gap.is_empty() {
                parts.push(".".to_string());
            } else {
                let labels: Vec<String> = gap.iter().map(name).collect();
                parts.push(format!("{{{}}}*", labels.join(",")));
            }
            if let Some(w) = self.writes.get(i) {
                parts.push(format!("{}={}", name(w.label), w.values));
            }
        }
        parts.join(" ")
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(&|l| l.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(ls: &[usize]) -> LabelSet {
        ls.iter().copied().collect()
    }

    fn values(vs: &[u32]) -> ValueSet {
        vs.iter().copied().collect()
    }

    #[test]
    fn test_append_pre_cases() {
        let any = Channel::any(labels(&[0, 1]));
        // absorbed by the gap only
        assert_eq!(any.append_pre(0, 1).as_slice(), &[any.clone()]);
        assert!(Channel::empty().append_pre(0, 1).is_empty());

        let tracked = Channel::empty().uncommit_head(0, values(&[1]));
        let pres = tracked.append_pre(0, 1);
        assert_eq!(pres.as_slice(), &[Channel::empty()]);
        assert!(tracked.append_pre(0, 0).is_empty());
        assert!(tracked.append_pre(1, 1).is_empty());
    }

    #[test]
    fn test_pop_tail_reports_values() {
        let ch = Channel::any(labels(&[2]));
        let pres = ch.pop_tail(2);
        assert_eq!(pres.as_slice(), &[(ch.clone(), None)]);

        // tracked at the tail and also absorbable by the last gap
        let ch = Channel::any(labels(&[2])).uncommit_head(2, values(&[0, 1]));
        assert_eq!(ch.pop_tail(2).len(), 2);

        let ch = Channel::empty().uncommit_head(2, values(&[0, 1]));
        let pres = ch.pop_tail(2);
        assert_eq!(pres.as_slice(), &[(Channel::empty(), Some(values(&[0, 1])))]);
    }

    #[test]
    fn test_view_pre_on_any() {
        let ch = Channel::any(labels(&[0, 1]));
        let views = ch.view_pre(0, values(&[1]));
        assert_eq!(views.len(), 2);
        match &views[0] {
            View::Pending(pre) => {
                assert_eq!(pre.gaps(), &[labels(&[0, 1]), labels(&[1])]);
                assert_eq!(pre.tracked()[0].label, 0);
            }
            other => panic!("expected Pending, got {:?}", other),
        }
        match &views[1] {
            View::Behind(pre) => assert_eq!(pre.gaps(), &[labels(&[1])]),
            other => panic!("expected Behind, got {:?}", other),
        }
    }

    #[test]
    fn test_view_pre_narrows_newest_tracked() {
        let ch = Channel::empty()
            .uncommit_head(0, values(&[0, 1]))
            .uncommit_head(0, values(&[0]));
        let views = ch.view_pre(0, values(&[1]));
        assert_eq!(views.len(), 1);
        match &views[0] {
            View::Pending(pre) => {
                assert_eq!(pre.tracked()[0].values, values(&[0]));
                assert_eq!(pre.tracked()[1].values, values(&[1]));
            }
            other => panic!("expected Pending, got {:?}", other),
        }
        // incompatible value and nothing behind the tracked write
        assert!(ch.view_pre(0, values(&[2])).is_empty());
    }

    #[test]
    fn test_entails() {
        let any = Channel::any(labels(&[0, 1]));
        let empty = Channel::empty();
        let one = empty.uncommit_head(0, values(&[1]));
        assert!(empty.entails(&any));
        assert!(!any.entails(&empty));
        assert!(one.entails(&any));
        assert!(!any.entails(&one));
        assert!(one.entails(&empty.uncommit_head(0, values(&[0, 1]))));
        assert!(!one.entails(&empty.uncommit_head(0, values(&[0]))));
        assert!(!one.entails(&empty.uncommit_head(1, values(&[1]))));

        let two = one.uncommit_head(1, values(&[0]));
        assert!(!two.entails(&Channel::any(labels(&[1])).uncommit_head(0, values(&[1]))));
        assert!(two.entails(&Channel::any(labels(&[0])).uncommit_head(1, values(&[0]))));
    }

    #[test]
    fn test_absorb_head_is_idempotent() {
        let ch = Channel::empty().uncommit_head(0, values(&[1]));
        let once = ch.absorb_head(0);
        assert_eq!(once.gaps()[0], labels(&[0]));
        assert_eq!(once.absorb_head(0), once);
        assert!(ch.entails(&once));
        assert!(!once.entails(&ch));
        // a longer chain of committed writes is covered by the folded gap
        let longer = ch.uncommit_head(0, values(&[0, 1])).uncommit_head(0, values(&[0]));
        assert!(longer.entails(&once));
    }

    #[test]
    fn test_consistency() {
        let ch = Channel::any(labels(&[0])).uncommit_head(0, values(&[1]));
        assert!(ch.is_consistent(labels(&[0])));
        assert!(!ch.is_consistent(labels(&[1])));
        assert_eq!(ch.render(&|l| format!("x{}", l)), ". x0={1} {x0}*");
    }
}
