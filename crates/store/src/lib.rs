//! Calibration persistence and profile slots.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use types::{Calibration, Color, RobotProfile, PROFILE_ID_RANGE, PROFILE_SLOT_COUNT};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("calibration I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("calibration file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("profile id {0} is out of range ({}..={})", PROFILE_ID_RANGE.0, PROFILE_ID_RANGE.1)]
    UnknownProfile(u8),
}

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CalibrationFile {
    schema_version: u32,
    calibration: Calibration,
}

/// Persists a robot's [`Calibration`] to a JSON file, writing atomically so a
/// crash mid-write never leaves a half-written, unparseable file behind.
pub struct CalibrationStore {
    path: PathBuf,
    calibration: Calibration,
}

impl CalibrationStore {
    /// Load calibration from `path`, falling back to [`Calibration::default`]
    /// if the file is missing or unreadable. Either way the loaded value is
    /// clamped into range before use.
    pub fn load_or_default(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let calibration = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<CalibrationFile>(&contents) {
                Ok(file) => file.calibration.clamped(),
                Err(err) => {
                    warn!(%err, path = %path.display(), "calibration file corrupt, using defaults");
                    Calibration::default()
                }
            },
            Err(err) => {
                info!(%err, path = %path.display(), "no calibration file, using defaults");
                Calibration::default()
            }
        };
        Self { path, calibration }
    }

    pub fn get(&self) -> Calibration {
        self.calibration
    }

    /// Clamp and persist a new calibration, returning the value actually
    /// stored (which may differ from the input if it was out of range).
    pub fn set(&mut self, calibration: Calibration) -> Result<Calibration, StoreError> {
        let calibration = calibration.clamped();
        self.calibration = calibration;
        self.persist()?;
        Ok(calibration)
    }

    fn persist(&self) -> Result<(), StoreError> {
        let file = CalibrationFile {
            schema_version: SCHEMA_VERSION,
            calibration: self.calibration,
        };
        let serialized = serde_json::to_string_pretty(&file)?;

        let tmp_path = tmp_path_for(&self.path);
        fs::write(&tmp_path, serialized)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// The built-in, RAM-only table of profile slots a robot ships with, plus
/// the one currently active: this robot's own identity. Nothing here
/// survives a reboot; a robot always comes back up on its built-in default
/// name/color and waits for the controller to `set_profile` it again if the
/// operator wants something else. See DESIGN.md for why this stays RAM-only.
pub struct ProfileStore {
    defaults: [RobotProfile; PROFILE_SLOT_COUNT],
    own_id: u8,
    active: RobotProfile,
}

impl ProfileStore {
    /// Profile names longer than this are truncated, matching the 20-char
    /// display budget of the robot's on-board name field.
    const NAME_MAX_LEN: usize = 20;

    /// Stock (name, color) pairs for the 8 built-in slots.
    const DEFAULTS: [(&'static str, Color); PROFILE_SLOT_COUNT] = [
        ("THUNDER", Color { r: 255, g: 140, b: 0 }),
        ("BLITZ", Color { r: 255, g: 255, b: 0 }),
        ("NITRO", Color { r: 255, g: 0, b: 0 }),
        ("TURBO", Color { r: 0, g: 255, b: 0 }),
        ("SPEED", Color { r: 255, g: 255, b: 255 }),
        ("BOLT", Color { r: 0, g: 0, b: 255 }),
        ("FLASH", Color { r: 0, g: 255, b: 128 }),
        ("STORM", Color { r: 0, g: 200, b: 255 }),
    ];

    /// Build the default 8-slot table with distinct stock names/colors, and
    /// adopt `own_id`'s slot (1-based) as this robot's active identity.
    pub fn seeded(own_id: u8) -> Self {
        let defaults = std::array::from_fn(|i| {
            let (name, color) = Self::DEFAULTS[i];
            RobotProfile {
                id: (i + 1) as u8,
                name: name.to_string(),
                color,
            }
        });
        let own_index = (own_id.clamp(PROFILE_ID_RANGE.0, PROFILE_ID_RANGE.1) - 1) as usize;
        let active = defaults[own_index].clone();

        Self {
            defaults,
            own_id: active.id,
            active,
        }
    }

    pub fn active(&self) -> &RobotProfile {
        &self.active
    }

    pub fn own_id(&self) -> u8 {
        self.own_id
    }

    pub fn default_slot(&self, profile_id: u8) -> Result<&RobotProfile, StoreError> {
        if profile_id < PROFILE_ID_RANGE.0 || profile_id > PROFILE_ID_RANGE.1 {
            return Err(StoreError::UnknownProfile(profile_id));
        }
        Ok(&self.defaults[(profile_id - 1) as usize])
    }

    /// Apply a `set_profile` request: update the active identity's name and
    /// color in place, but only if `robot_id` matches this robot's own id.
    /// A mismatched id is rejected rather than silently adopting a name
    /// meant for a different robot on the LAN.
    pub fn apply_set_profile(
        &mut self,
        robot_id: u8,
        name: String,
        color: Color,
    ) -> Result<&RobotProfile, StoreError> {
        if robot_id != self.own_id {
            return Err(StoreError::UnknownProfile(robot_id));
        }
        self.active.name = name.chars().take(Self::NAME_MAX_LEN).collect();
        self.active.color = color;
        info!(robot_id, name = %self.active.name, "active profile updated");
        Ok(&self.active)
    }
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::seeded(PROFILE_ID_RANGE.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("picogo-store-test-{name}-{}.json", std::process::id()));
        p
    }

    #[test]
    fn missing_file_falls_back_to_default_calibration() {
        let path = temp_path("missing");
        let _ = fs::remove_file(&path);
        let store = CalibrationStore::load_or_default(&path);
        assert_eq!(store.get(), Calibration::default());
    }

    #[test]
    fn set_persists_and_reloads() {
        let path = temp_path("roundtrip");
        let _ = fs::remove_file(&path);

        let mut store = CalibrationStore::load_or_default(&path);
        store
            .set(Calibration {
                steering_trim: 0.1,
                motor_left_scale: 0.9,
                motor_right_scale: 0.95,
            })
            .unwrap();

        let reloaded = CalibrationStore::load_or_default(&path);
        assert_eq!(reloaded.get().steering_trim, 0.1);
        assert_eq!(reloaded.get().motor_left_scale, 0.9);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn set_clamps_out_of_range_values() {
        let path = temp_path("clamp");
        let _ = fs::remove_file(&path);

        let mut store = CalibrationStore::load_or_default(&path);
        let stored = store
            .set(Calibration {
                steering_trim: 5.0,
                motor_left_scale: 2.0,
                motor_right_scale: 0.0,
            })
            .unwrap();

        assert_eq!(stored.steering_trim, Calibration::TRIM_RANGE.1);
        assert_eq!(stored.motor_left_scale, Calibration::SCALE_RANGE.1);
        assert_eq!(stored.motor_right_scale, Calibration::SCALE_RANGE.0);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn no_tmp_file_left_behind_after_persist() {
        let path = temp_path("tmp-cleanup");
        let _ = fs::remove_file(&path);

        let mut store = CalibrationStore::load_or_default(&path);
        store.set(Calibration::default()).unwrap();

        assert!(!tmp_path_for(&path).exists());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn profile_store_seeds_own_id_as_active() {
        let profiles = ProfileStore::seeded(3);
        assert_eq!(profiles.active().id, 3);
        assert_eq!(profiles.own_id(), 3);
        assert!(profiles.default_slot(8).is_ok());
        assert!(matches!(
            profiles.default_slot(9),
            Err(StoreError::UnknownProfile(9))
        ));
    }

    #[test]
    fn set_profile_updates_active_when_id_matches() {
        let mut profiles = ProfileStore::seeded(1);
        let updated = profiles
            .apply_set_profile(1, "Scout".to_string(), Color { r: 10, g: 20, b: 30 })
            .unwrap();
        assert_eq!(updated.name, "Scout");
        assert_eq!(profiles.active().name, "Scout");
        assert_eq!(profiles.active().color, Color { r: 10, g: 20, b: 30 });
    }

    #[test]
    fn set_profile_truncates_overlong_names() {
        let mut profiles = ProfileStore::seeded(1);
        let long_name = "A".repeat(40);
        profiles
            .apply_set_profile(1, long_name, Color::default())
            .unwrap();
        assert_eq!(profiles.active().name.chars().count(), 20);
    }

    #[test]
    fn set_profile_rejects_mismatched_robot_id() {
        let mut profiles = ProfileStore::seeded(1);
        let result = profiles.apply_set_profile(2, "Intruder".to_string(), Color::default());
        assert!(matches!(result, Err(StoreError::UnknownProfile(2))));
        assert_eq!(profiles.active().name, "THUNDER");
    }
}
