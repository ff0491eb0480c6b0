use core::fmt;

use skein_primitives::window::EventWindow;

/// Verdict of comparing two event windows at the start of a sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncFallenBehindStatus {
    None,
    /// This node needs events the peer has already expired.
    SelfFallenBehind,
    /// The peer needs events this node has already expired.
    OtherFallenBehind,
}

impl SyncFallenBehindStatus {
    /// Compares windows; a pure function, so both ends of a sync reach mirrored verdicts.
    #[must_use]
    pub const fn get_status(self_window: &EventWindow, other_window: &EventWindow) -> Self {
        if other_window.ancient_threshold < self_window.expired_threshold {
            return Self::OtherFallenBehind;
        }
        if self_window.ancient_threshold < other_window.expired_threshold {
            return Self::SelfFallenBehind;
        }
        Self::None
    }

    /// The verdict the peer reaches about the same pair of windows.
    #[must_use]
    pub const fn mirrored(self) -> Self {
        match self {
            Self::None => Self::None,
            Self::SelfFallenBehind => Self::OtherFallenBehind,
            Self::OtherFallenBehind => Self::SelfFallenBehind,
        }
    }
}

impl fmt::Display for SyncFallenBehindStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::SelfFallenBehind => "self_fallen_behind",
            Self::OtherFallenBehind => "other_fallen_behind",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_against_advanced_window() {
        let genesis = EventWindow::genesis();
        let advanced = EventWindow::new(100, 101, 1000, 800);

        assert_eq!(
            SyncFallenBehindStatus::get_status(&genesis, &advanced),
            SyncFallenBehindStatus::SelfFallenBehind,
            "genesis needs rounds the peer expired"
        );
        assert_eq!(
            SyncFallenBehindStatus::get_status(&advanced, &genesis),
            SyncFallenBehindStatus::OtherFallenBehind,
            "mirror image"
        );
    }

    #[test]
    fn test_overlapping_windows_are_fine() {
        let a = EventWindow::new(50, 51, 30, 20);
        let b = EventWindow::new(55, 56, 35, 25);

        assert_eq!(
            SyncFallenBehindStatus::get_status(&a, &b),
            SyncFallenBehindStatus::None,
            "each still holds what the other needs"
        );
    }

    #[test]
    fn test_verdicts_are_mirrored_for_any_pair() {
        let thresholds = [1_u64, 2, 5, 10, 20, 40];

        for a_ancient in thresholds {
            for a_expired in thresholds.iter().copied().filter(|e| *e <= a_ancient) {
                for b_ancient in thresholds {
                    for b_expired in thresholds.iter().copied().filter(|e| *e <= b_ancient) {
                        let a = EventWindow::new(0, 0, a_ancient, a_expired);
                        let b = EventWindow::new(0, 0, b_ancient, b_expired);

                        let ab = SyncFallenBehindStatus::get_status(&a, &b);
                        let ba = SyncFallenBehindStatus::get_status(&b, &a);

                        if ab == SyncFallenBehindStatus::SelfFallenBehind {
                            assert_eq!(ba, ab.mirrored(), "{a} vs {b}");
                        }
                        if ab == SyncFallenBehindStatus::None {
                            assert_eq!(ba, SyncFallenBehindStatus::None, "{a} vs {b}");
                        }
                    }
                }
            }
        }
    }
}
