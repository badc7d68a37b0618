//! Bounded extrapolation and pairwise separation (source spec §4.6). Tightly
//! coupled to the replicated state — it reads and writes
//! [`protocol::GlobalGameState`] directly rather than going through the
//! conflict resolver, since neither operation here is a conflict: movement
//! is purely local smoothing of state already accepted by the state
//! manager.

use std::collections::HashMap;

use protocol::{GlobalGameState, PlayerId, Position};

use crate::config::MovementConfig;

/// Per-player extrapolation bookkeeping. Owned by whichever component
/// drives `tick()` — the session facade, in this crate.
#[derive(Default)]
pub struct MovementIntegrator {
    config: MovementConfig,
    last_move_ts: HashMap<PlayerId, f64>,
    last_frame_ts: HashMap<PlayerId, f64>,
}

impl MovementIntegrator {
    pub fn new(config: MovementConfig) -> Self {
        Self { config, last_move_ts: HashMap::new(), last_frame_ts: HashMap::new() }
    }

    /// Records that an accepted move for `peer` landed at `now`. Called by
    /// the session facade right after `StateManager::handle` reports a
    /// `PlayerMove` outcome. On a player's very first move there is no
    /// prior frame to measure `frameDt` against, so `lastFrameTs` is seeded
    /// to the same instant — the first `interpolate` call afterward then
    /// measures time since the move itself, not since the session started.
    pub fn note_move(&mut self, peer: &PlayerId, now: f64) {
        self.last_move_ts.insert(peer.clone(), now);
        self.last_frame_ts.entry(peer.clone()).or_insert(now);
    }

    /// Drops a departed player's bookkeeping, so a reused id doesn't
    /// inherit a stale extrapolation budget.
    pub fn remove_player(&mut self, peer: &PlayerId) {
        self.last_move_ts.remove(peer);
        self.last_frame_ts.remove(peer);
    }

    /// Advances every player with a known velocity by the bounded
    /// extrapolation rule of source spec §4.6.
    pub fn interpolate(&mut self, state: &mut GlobalGameState, now: f64) {
        for (id, last_move_ts) in self.last_move_ts.iter() {
            let Some(player) = state.players.get_mut(id) else { continue };
            let Some(velocity) = player.velocity else { continue };
            let last_frame_ts = *self.last_frame_ts.get(id).unwrap_or(last_move_ts);

            let frame_dt = (now - last_frame_ts).max(0.0) / 1000.0;
            let remaining_ms = (self.config.extrapolation_ms - (last_frame_ts - last_move_ts)).max(0.0);
            let allowed_dt = frame_dt.min(remaining_ms / 1000.0);

            let clamp = |v: f64| v.clamp(-self.config.max_speed, self.config.max_speed);
            player.position.x += clamp(velocity.x) * allowed_dt * self.config.smoothing;
            player.position.y += clamp(velocity.y) * allowed_dt * self.config.smoothing;
            player.position.z += clamp(velocity.z) * allowed_dt * self.config.smoothing;

            if !self.config.ignore_world_bounds {
                player.position.x = player.position.x.clamp(0.0, self.config.world_width);
                player.position.y = player.position.y.clamp(0.0, self.config.world_height);
                if self.config.world_depth > 0.0 {
                    player.position.z = player.position.z.clamp(0.0, self.config.world_depth);
                }
            }

            self.last_frame_ts.insert(id.clone(), now);
        }
    }

    /// Pushes every overlapping pair of players apart so that, afterward,
    /// `‖a.pos − b.pos‖ ≥ 2·playerRadius` (source spec §4.6, invariant 3).
    /// Processed once per unordered pair — applying the correction to both
    /// `(a,b)` and `(b,a)` the spec describes would double the separation,
    /// so a single deterministic sweep over distinct pairs realizes the
    /// same "move each by half the overlap" rule exactly once.
    pub fn resolve_collisions(&self, state: &mut GlobalGameState) {
        let radius = self.config.player_radius;
        let mut ids: Vec<PlayerId> = state.players.keys().cloned().collect();
        ids.sort();

        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let (a_pos, b_pos) = {
                    let a = state.players[&ids[i]].position;
                    let b = state.players[&ids[j]].position;
                    (a, b)
                };
                let az = a_pos.z;
                let bz = b_pos.z;
                let dx = b_pos.x - a_pos.x;
                let dy = b_pos.y - a_pos.y;
                let dz = bz - az;
                let distance = (dx * dx + dy * dy + dz * dz).sqrt();
                let min_distance = 2.0 * radius;
                if distance >= min_distance {
                    continue;
                }

                let (nx, ny, nz) = if distance < f64::EPSILON {
                    (1.0, 0.0, 0.0)
                } else {
                    (dx / distance, dy / distance, dz / distance)
                };
                let overlap = min_distance - distance;
                let half = overlap / 2.0;

                let a = &mut state.players.get_mut(&ids[i]).unwrap().position;
                a.x -= nx * half;
                a.y -= ny * half;
                a.z -= nz * half;

                let b = &mut state.players.get_mut(&ids[j]).unwrap().position;
                b.x += nx * half;
                b.y += ny * half;
                b.z += nz * half;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{PlayerState, Velocity};

    fn config(max_speed: f64, smoothing: f64, extrapolation_ms: f64) -> MovementConfig {
        MovementConfig {
            max_speed,
            smoothing,
            extrapolation_ms,
            world_width: 2000.0,
            world_height: 2000.0,
            world_depth: 0.0,
            ignore_world_bounds: false,
            player_radius: 16.0,
        }
    }

    #[test]
    fn extrapolation_is_bounded_by_remaining_budget() {
        let mut integrator = MovementIntegrator::new(config(400.0, 1.0, 120.0));
        let mut state = GlobalGameState::default();
        let p = PlayerId::from("P");
        state.players.insert(
            p.clone(),
            PlayerState { position: Position { x: 0.0, y: 0.0, z: 0.0 }, velocity: Some(Velocity { x: 100.0, y: 0.0, z: 0.0 }) },
        );
        integrator.note_move(&p, 0.0);
        // A huge frame_dt (1 full second) should still be capped to the 120ms budget.
        integrator.interpolate(&mut state, 1000.0);
        let expected = 100.0 * (120.0 / 1000.0);
        assert!((state.players[&p].position.x - expected).abs() < 1e-9);
    }

    #[test]
    fn ignoring_world_bounds_leaves_position_unclamped() {
        let mut cfg = config(10_000.0, 1.0, 10_000.0);
        cfg.ignore_world_bounds = true;
        cfg.world_width = 10.0;
        cfg.world_height = 10.0;
        let mut integrator = MovementIntegrator::new(cfg);
        let mut state = GlobalGameState::default();
        let p = PlayerId::from("P");
        state.players.insert(
            p.clone(),
            PlayerState { position: Position { x: 0.0, y: 0.0, z: 0.0 }, velocity: Some(Velocity { x: 1000.0, y: 0.0, z: 0.0 }) },
        );
        integrator.note_move(&p, 0.0);
        integrator.interpolate(&mut state, 1000.0);
        assert!(state.players[&p].position.x > 10.0);
    }

    #[test]
    fn world_bounds_clamp_when_not_ignored() {
        let mut cfg = config(10_000.0, 1.0, 10_000.0);
        cfg.world_width = 10.0;
        cfg.world_height = 10.0;
        let mut integrator = MovementIntegrator::new(cfg);
        let mut state = GlobalGameState::default();
        let p = PlayerId::from("P");
        state.players.insert(
            p.clone(),
            PlayerState { position: Position { x: 0.0, y: 0.0, z: 0.0 }, velocity: Some(Velocity { x: 1000.0, y: 0.0, z: 0.0 }) },
        );
        integrator.note_move(&p, 0.0);
        integrator.interpolate(&mut state, 1000.0);
        assert_eq!(state.players[&p].position.x, 10.0);
    }

    #[test]
    fn resolve_collisions_separates_overlapping_pair() {
        let integrator = MovementIntegrator::new(config(400.0, 0.2, 120.0));
        let mut state = GlobalGameState::default();
        let a = PlayerId::from("A");
        let b = PlayerId::from("B");
        state.players.insert(a.clone(), PlayerState { position: Position { x: 0.0, y: 0.0, z: 0.0 }, velocity: None });
        state.players.insert(b.clone(), PlayerState { position: Position { x: 1.0, y: 0.0, z: 0.0 }, velocity: None });

        integrator.resolve_collisions(&mut state);

        let dx = state.players[&b].position.x - state.players[&a].position.x;
        assert!((dx.abs() - 32.0).abs() < 1e-9);
    }

    #[test]
    fn resolve_collisions_uses_deterministic_axis_when_coincident() {
        let integrator = MovementIntegrator::new(config(400.0, 0.2, 120.0));
        let mut state = GlobalGameState::default();
        let a = PlayerId::from("A");
        let b = PlayerId::from("B");
        state.players.insert(a.clone(), PlayerState { position: Position { x: 5.0, y: 5.0, z: 0.0 }, velocity: None });
        state.players.insert(b.clone(), PlayerState { position: Position { x: 5.0, y: 5.0, z: 0.0 }, velocity: None });

        integrator.resolve_collisions(&mut state);

        assert_eq!(state.players[&a].position.y, 5.0);
        assert_eq!(state.players[&b].position.y, 5.0);
        assert_ne!(state.players[&a].position.x, state.players[&b].position.x);
    }
}
