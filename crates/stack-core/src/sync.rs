//! Snapshot of the complete game state.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::collab::{ScoreAccumulator, TimedMode};
use crate::game::StackGame;
use crate::monitor::StabilityMonitor;
use crate::physics::PhysicsWorld;
use crate::scheduler::DropScheduler;
use crate::stabilizer::TowerStabilizer;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to encode snapshot: {0}")]
    Encode(postcard::Error),
    #[error("failed to decode snapshot: {0}")]
    Decode(postcard::Error),
}

#[derive(Serialize)]
struct SnapshotRef<'a, S, T> {
    physics_world: &'a PhysicsWorld,
    scheduler: &'a DropScheduler,
    stabilizer: &'a TowerStabilizer,
    monitor: &'a StabilityMonitor,
    score: &'a S,
    timed: &'a T,
}

/// Decoded game state.
///
/// The configuration is not part of it, so the scheduler's selector has an
/// empty catalog until the snapshot is restored into a game.
#[derive(Debug, Deserialize)]
pub struct StackSnapshot<S, T> {
    pub physics_world: PhysicsWorld,
    pub scheduler: DropScheduler,
    pub stabilizer: TowerStabilizer,
    pub monitor: StabilityMonitor,
    pub score: S,
    pub timed: T,
}

impl<S: DeserializeOwned, T: DeserializeOwned> StackSnapshot<S, T> {
    pub fn from_bytes(data: &[u8]) -> Result<Self, SnapshotError> {
        postcard::from_bytes(data).map_err(SnapshotError::Decode)
    }

    pub fn frame(&self) -> u64 {
        self.physics_world.current_frame()
    }

    pub fn compute_hash(&self) -> u64 {
        self.physics_world.compute_hash()
    }
}

impl<S, T> StackGame<S, T>
where
    S: ScoreAccumulator + Serialize + DeserializeOwned,
    T: TimedMode + Serialize + DeserializeOwned,
{
    /// Serializes the current state with postcard.
    pub fn snapshot(&self) -> Result<Vec<u8>, SnapshotError> {
        let snapshot = SnapshotRef {
            physics_world: &self.world,
            scheduler: &self.scheduler,
            stabilizer: &self.stabilizer,
            monitor: &self.monitor,
            score: &self.score,
            timed: &self.timed,
        };
        postcard::to_allocvec(&snapshot).map_err(SnapshotError::Encode)
    }

    /// Replaces the current state with a decoded snapshot.
    ///
    /// The variant catalog and selection policy are rebuilt from this game's
    /// configuration.
    pub fn restore_from_snapshot(&mut self, snapshot: StackSnapshot<S, T>) {
        self.world = snapshot.physics_world;
        self.scheduler = snapshot.scheduler;
        self.scheduler
            .selector_mut()
            .rebind(self.config.variant_catalog(), self.config.selection.clone());
        self.stabilizer = snapshot.stabilizer;
        self.monitor = snapshot.monitor;
        self.score = snapshot.score;
        self.timed = snapshot.timed;
        tracing::info!("[game] Restored snapshot at frame {}", self.world.current_frame());
    }

    pub fn restore(&mut self, data: &[u8]) -> Result<(), SnapshotError> {
        let snapshot = StackSnapshot::from_bytes(data)?;
        self.restore_from_snapshot(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{ScoreBoard, TimeAttack};
    use crate::config::StackConfig;
    use crate::scheduler::SchedulerState;

    fn config() -> StackConfig {
        let mut config = StackConfig::default_classic();
        config.spawn_point = [0.0, 3.0];
        config
    }

    fn autoplay(game: &mut StackGame<ScoreBoard, TimeAttack>) {
        let drop = game.scheduler().state() == SchedulerState::AwaitingDrop;
        game.tick(drop).unwrap();
    }

    #[test]
    fn test_snapshot_restores_state() {
        let mut game = StackGame::time_attack(config(), 30.0);
        for _ in 0..240 {
            autoplay(&mut game);
        }

        let bytes = game.snapshot().unwrap();
        let snapshot: StackSnapshot<ScoreBoard, TimeAttack> = StackSnapshot::from_bytes(&bytes).unwrap();
        assert_eq!(snapshot.frame(), 240);
        assert_eq!(snapshot.compute_hash(), game.compute_hash());

        let mut restored = StackGame::time_attack(config(), 30.0);
        restored.restore_from_snapshot(snapshot);
        assert_eq!(restored.current_frame(), 240);
        assert_eq!(restored.score(), game.score());
        assert_eq!(restored.timed(), game.timed());
        assert_eq!(restored.scheduler().state(), game.scheduler().state());
        assert_eq!(restored.scheduler().selector().catalog(), game.scheduler().selector().catalog());
        assert_eq!(restored.scheduler().selector().policy(), game.scheduler().selector().policy());
        assert_eq!(
            restored.scheduler().blocks().blocks().len(),
            game.scheduler().blocks().blocks().len()
        );
    }

    #[test]
    fn test_restored_games_stay_in_lockstep() {
        let mut game = StackGame::time_attack(config(), 30.0);
        for _ in 0..150 {
            autoplay(&mut game);
        }
        let bytes = game.snapshot().unwrap();

        let mut a = StackGame::time_attack(config(), 30.0);
        let mut b = StackGame::time_attack(config(), 30.0);
        a.restore(&bytes).unwrap();
        b.restore(&bytes).unwrap();

        for _ in 0..300 {
            autoplay(&mut a);
            autoplay(&mut b);
        }
        assert_eq!(a.compute_hash(), b.compute_hash());
        assert_eq!(a.score(), b.score());
    }

    #[test]
    fn test_restored_game_keeps_spawning() {
        let mut config = config();
        config.spawn_point = [0.0, 12.0];
        let mut game = StackGame::time_attack(config.clone(), 30.0);
        for _ in 0..200 {
            autoplay(&mut game);
        }
        let landed_before = game.score().credited_landings();

        let mut restored = StackGame::time_attack(config, 30.0);
        restored.restore(&game.snapshot().unwrap()).unwrap();
        for _ in 0..300 {
            autoplay(&mut restored);
        }
        assert!(!restored.scheduler().is_halted());
        assert!(restored.score().credited_landings() > landed_before);
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        let mut game = StackGame::time_attack(config(), 30.0);
        assert!(matches!(game.restore(&[0xff, 0x01]), Err(SnapshotError::Decode(_))));
        assert_eq!(game.current_frame(), 0);
    }
}
