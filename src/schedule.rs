//! Force-level schedule for a measurement session.
//!
//! Every participant performs each target force twice in a row, with the
//! order of the levels randomized.

use crate::error::AppResult;
use rand::seq::SliceRandom;
use rand::Rng;
use std::fmt;
use std::path::{Path, PathBuf};

/// Target forces in % MVC.
pub const FORCE_LEVELS: [i64; 7] = [20, 30, 40, 50, 60, 70, 80];

/// Repetitions of each level.
pub const REPETITIONS: usize = 2;

/// Shuffled levels, each repeated consecutively.
pub fn force_level_schedule<R: Rng + ?Sized>(rng: &mut R) -> Vec<i64> {
    let mut levels = FORCE_LEVELS.to_vec();
    levels.shuffle(rng);
    levels
        .into_iter()
        .flat_map(|level| std::iter::repeat(level).take(REPETITIONS))
        .collect()
}

/// Steps through a schedule trial by trial.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialProgress {
    schedule: Vec<i64>,
    position: usize,
}

impl TrialProgress {
    /// Start at the first trial.
    pub fn new(schedule: Vec<i64>) -> Self {
        Self {
            schedule,
            position: 0,
        }
    }

    /// Target force of the current trial.
    pub fn current(&self) -> Option<i64> {
        self.schedule.get(self.position).copied()
    }

    /// Zero-based index of the current trial.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of trials.
    pub fn len(&self) -> usize {
        self.schedule.len()
    }

    /// True for an empty schedule.
    pub fn is_empty(&self) -> bool {
        self.schedule.is_empty()
    }

    /// Share of trials completed, in 0..1.
    pub fn fraction_complete(&self) -> f64 {
        if self.schedule.is_empty() {
            return 0.0;
        }
        self.position as f64 / self.schedule.len() as f64
    }

    /// Move to the next trial, wrapping to the first after the last.
    pub fn advance(&mut self) -> Option<i64> {
        if self.schedule.is_empty() {
            return None;
        }
        self.position = (self.position + 1) % self.schedule.len();
        self.current()
    }
}

impl fmt::Display for TrialProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.current() {
            Some(level) => write!(
                f,
                "trial {:2}/{}: {}% MVC ({:.0}% done)",
                self.position + 1,
                self.len(),
                level,
                self.fraction_complete() * 100.0
            ),
            None => write!(f, "no trials"),
        }
    }
}

/// Raw data folders of one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantLayout {
    /// `<base>/<participant>`
    pub root: PathBuf,
    /// Raw `.eit` files
    pub eit_raw: PathBuf,
    /// Device export and recorder chunks
    pub iso_raw: PathBuf,
}

/// Create `<base>/<participant>/{eit_raw,iso_raw}`.
pub fn participant_layout(base: &Path, participant: &str) -> AppResult<ParticipantLayout> {
    let root = base.join(participant);
    let layout = ParticipantLayout {
        eit_raw: root.join("eit_raw"),
        iso_raw: root.join("iso_raw"),
        root,
    };
    std::fs::create_dir_all(&layout.eit_raw)?;
    std::fs::create_dir_all(&layout.iso_raw)?;
    tracing::info!("Created folders for {} in {}", participant, base.display());
    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_schedule_repeats_each_level() {
        let mut rng = StdRng::seed_from_u64(7);
        let schedule = force_level_schedule(&mut rng);
        assert_eq!(schedule.len(), 14);
        for pair in schedule.chunks(2) {
            assert_eq!(pair[0], pair[1]);
        }
        let mut levels: Vec<i64> = schedule.iter().step_by(2).copied().collect();
        levels.sort_unstable();
        assert_eq!(levels, FORCE_LEVELS);
    }

    #[test]
    fn test_same_seed_same_schedule() {
        let a = force_level_schedule(&mut StdRng::seed_from_u64(3));
        let b = force_level_schedule(&mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
    }

    #[test]
    fn test_progress_wraps() {
        let mut progress = TrialProgress::new(vec![20, 20, 50, 50]);
        assert_eq!(progress.current(), Some(20));
        assert_eq!(progress.fraction_complete(), 0.0);
        progress.advance();
        progress.advance();
        assert_eq!(progress.current(), Some(50));
        assert_eq!(progress.fraction_complete(), 0.5);
        progress.advance();
        assert_eq!(progress.advance(), Some(20));
        assert_eq!(progress.position(), 0);

        let mut empty = TrialProgress::new(Vec::new());
        assert_eq!(empty.advance(), None);
    }

    #[test]
    fn test_progress_display() {
        let mut progress = TrialProgress::new(vec![40, 40, 70, 70]);
        assert_eq!(progress.to_string(), "trial  1/4: 40% MVC (0% done)");
        progress.advance();
        progress.advance();
        assert_eq!(progress.to_string(), "trial  3/4: 70% MVC (50% done)");
        assert_eq!(TrialProgress::new(Vec::new()).to_string(), "no trials");
    }

    #[test]
    fn test_participant_layout() {
        let dir = tempfile::tempdir().unwrap();
        let layout = participant_layout(dir.path(), "P03").unwrap();
        assert!(layout.eit_raw.is_dir());
        assert!(layout.iso_raw.is_dir());
        assert_eq!(layout.root, dir.path().join("P03"));
    }
}
