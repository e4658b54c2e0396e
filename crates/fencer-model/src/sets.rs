//! Small bitsets over values and locations.

use std::fmt;

macro_rules! bitset64 {
    ($(#[$meta:meta])* $name:ident, $elem:ty) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub const EMPTY: Self = Self(0);

            #[inline]
            pub fn from_bits(bits: u64) -> Self {
                Self(bits)
            }

            #[inline]
            pub fn bits(self) -> u64 {
                self.0
            }

            /// The set `{0, .., n - 1}`.
            #[inline]
            pub fn below(n: usize) -> Self {
                if n >= 64 {
                    Self(u64::MAX)
                } else {
                    Self((1u64 << n) - 1)
                }
            }

            #[inline]
            pub fn singleton(e: $elem) -> Self {
                Self(1u64 << (e as u64))
            }

            #[inline]
            pub fn contains(self, e: $elem) -> bool {
                (e as u64) < 64 && self.0 & (1u64 << (e as u64)) != 0
            }

            #[inline]
            pub fn insert(&mut self, e: $elem) {
                self.0 |= 1u64 << (e as u64);
            }

            #[inline]
            pub fn remove(&mut self, e: $elem) {
                self.0 &= !(1u64 << (e as u64));
            }

            #[inline]
            #[must_use]
            pub fn with(self, e: $elem) -> Self {
                Self(self.0 | (1u64 << (e as u64)))
            }

            #[inline]
            #[must_use]
            pub fn without(self, e: $elem) -> Self {
                Self(self.0 & !(1u64 << (e as u64)))
            }

            #[inline]
            pub fn is_empty(self) -> bool {
                self.0 == 0
            }

            #[inline]
            pub fn len(self) -> usize {
                self.0.count_ones() as usize
            }

            #[inline]
            pub fn is_subset(self, other: Self) -> bool {
                self.0 & !other.0 == 0
            }

            #[inline]
            #[must_use]
            pub fn intersect(self, other: Self) -> Self {
                Self(self.0 & other.0)
            }

            #[inline]
            #[must_use]
            pub fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }

            #[inline]
            #[must_use]
            pub fn difference(self, other: Self) -> Self {
                Self(self.0 & !other.0)
            }

            /// Smallest element, if any.
            #[inline]
            pub fn first(self) -> Option<$elem> {
                if self.0 == 0 {
                    None
                } else {
                    Some(self.0.trailing_zeros() as $elem)
                }
            }

            pub fn iter(self) -> impl Iterator<Item = $elem> {
                let mut bits = self.0;
                std::iter::from_fn(move || {
                    if bits == 0 {
                        None
                    } else {
                        let e = bits.trailing_zeros();
                        bits &= bits - 1;
                        Some(e as $elem)
                    }
                })
            }
        }

        impl FromIterator<$elem> for $name {
            fn from_iter<I: IntoIterator<Item = $elem>>(iter: I) -> Self {
                let mut s = Self::EMPTY;
                for e in iter {
                    s.insert(e);
                }
                s
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_set().entries(self.iter()).finish()
            }
        }
    };
}

bitset64!(
    /// A set of values of one location's domain.
    ValueSet,
    u32
);

bitset64!(
    /// A set of location ids.
    LocSet,
    usize
);

impl fmt::Display for ValueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, v) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_set_ops() {
        let full = ValueSet::below(3);
        assert_eq!(full.len(), 3);
        assert!(full.contains(2));
        assert!(!full.contains(3));
        let s = ValueSet::singleton(1);
        assert!(s.is_subset(full));
        assert!(!full.is_subset(s));
        assert_eq!(full.without(1), ValueSet::from_iter([0, 2]));
        assert_eq!(full.intersect(s), s);
        assert_eq!(s.first(), Some(1));
        assert_eq!(ValueSet::EMPTY.first(), None);
        assert_eq!(full.iter().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(full.to_string(), "{0,1,2}");
    }

    #[test]
    fn test_full_width() {
        let all = LocSet::below(64);
        assert_eq!(all.len(), 64);
        assert!(all.contains(63));
        assert!(!all.contains(64));
    }
}
