use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use anyhow::{Result, Context, anyhow, bail};
use tracing::{info, warn};

use crate::media::ffmpeg::SamplerSettings;
use crate::media::layout::AssetKind;
use crate::pose::analyzer::AnalyzerSettings;

const MODEL_FILE_NAME: &str = "pose.onnx";
const MODEL_KEY: &str = "POSE_MODEL_PATH";

/// Everything a run needs, resolved from defaults, the config file, and CLI flags (in that order).
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub media_dir: PathBuf,
    pub result_dir: PathBuf,
    pub db_path: PathBuf,
    pub model_path: Option<PathBuf>,
    pub model_input_size: u32,
    pub sampler: SamplerSettings,
    pub analyzer: AnalyzerSettings,
    pub threshold: f32,
    pub frame_radius: usize,
    pub clip_fps: u32,
    pub overlay_fps: u32,
    pub pose_workers: usize,
    pub asset_kind: AssetKind,
    /// gzip level of the result archive (0-9); the encoder default when unset.
    pub compression_level: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            media_dir: PathBuf::from("media"),
            result_dir: PathBuf::from("results"),
            db_path: PathBuf::from("keypoints.db"),
            model_path: None,
            model_input_size: 256,
            sampler: SamplerSettings::default(),
            analyzer: AnalyzerSettings::default(),
            threshold: 10.0,
            frame_radius: 2,
            clip_fps: 30,
            overlay_fps: 15,
            pose_workers: 2,
            asset_kind: AssetKind::Skeleton,
            compression_level: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with the `KEY=VALUE` lines of `path`, if it exists.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::default();

        if path.exists() {
            let file = File::open(path).with_context(|| format!("Failed to open config {:?}", path))?;
            for (number, line) in BufReader::new(file).lines().enumerate() {
                let line = line?;
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    config
                        .apply(key.trim(), value.trim())
                        .with_context(|| format!("{:?} line {}", path, number + 1))?;
                }
            }
            info!("Loaded configuration from {:?}", path);
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets one setting from its config-file key. Unknown keys are ignored.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "MEDIA_DIR" => self.media_dir = PathBuf::from(value),
            "RESULT_DIR" => self.result_dir = PathBuf::from(value),
            "DB_PATH" => self.db_path = PathBuf::from(value),
            MODEL_KEY => self.model_path = Some(PathBuf::from(value)),
            "POSE_INPUT_SIZE" => self.model_input_size = parse(key, value)?,
            "SAMPLE_INTERVAL_SECS" => self.sampler.interval_secs = parse(key, value)?,
            "FRAME_WIDTH" => self.sampler.width = parse(key, value)?,
            "FRAME_HEIGHT" => self.sampler.height = parse(key, value)?,
            "DEVIATION_THRESHOLD" => self.threshold = parse(key, value)?,
            "FRAME_RADIUS" => self.frame_radius = parse(key, value)?,
            "MIN_CONFIDENCE" => self.analyzer.min_confidence = parse(key, value)?,
            "MIN_JOINTS" => self.analyzer.min_joints = parse(key, value)?,
            "ALIGNMENT" => self.analyzer.alignment = value.parse()?,
            "CLIP_FPS" => self.clip_fps = parse(key, value)?,
            "OVERLAY_FPS" => self.overlay_fps = parse(key, value)?,
            "POSE_WORKERS" => self.pose_workers = parse(key, value)?,
            "ASSET_KIND" => self.asset_kind = value.parse()?,
            "COMPRESSION_LEVEL" => self.compression_level = Some(parse(key, value)?),
            _ => {}
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            bail!("Deviation threshold must be a non-negative number, got {}", self.threshold);
        }
        if !self.sampler.interval_secs.is_finite() || self.sampler.interval_secs <= 0.0 {
            bail!("Sampling interval must be positive, got {}", self.sampler.interval_secs);
        }
        if self.sampler.width == 0 || self.sampler.height == 0 || self.model_input_size == 0 {
            bail!("Frame and model input sizes must be non-zero");
        }
        if !(0.0..=1.0).contains(&self.analyzer.min_confidence) {
            bail!("Minimum confidence must be within [0, 1], got {}", self.analyzer.min_confidence);
        }
        if self.clip_fps == 0 || self.overlay_fps == 0 || self.pose_workers == 0 {
            bail!("Frame rates and worker count must be non-zero");
        }
        if let Some(level) = self.compression_level.filter(|&level| level > 9) {
            bail!("Compression level must be within [0, 9], got {}", level);
        }
        Ok(())
    }

    /// Pose model location: the configured path, or a `pose.onnx` found nearby, which is then
    /// remembered in `config_path` for the next run.
    pub fn resolve_model_path(&mut self, config_path: &Path) -> Result<PathBuf> {
        if let Some(path) = &self.model_path {
            if path.is_file() {
                return Ok(path.clone());
            }
            warn!("Configured pose model {:?} does not exist, searching filesystem", path);
        }

        info!("Searching filesystem for {}...", MODEL_FILE_NAME);
        let found = find_file(MODEL_FILE_NAME, 5)?;
        info!("Found pose model: {:?}", found);

        save_setting(config_path, MODEL_KEY, &found.display().to_string())?;
        info!("Saved model path to {:?}", config_path);

        self.model_path = Some(found.clone());
        Ok(found)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| anyhow!("Invalid value '{}' for {}: {}", value, key, e))
}

fn find_file(filename: &str, max_depth: usize) -> Result<PathBuf> {
    let root = std::env::current_dir()?;

    // Current directory first, then the parent (useful when running from a subdir).
    let candidates = std::iter::once(root.as_path()).chain(root.parent());
    for dir in candidates {
        let found = WalkDir::new(dir)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| e.file_type().is_file() && e.file_name() == filename);

        if let Some(entry) = found {
            return Ok(entry.path().to_path_buf());
        }
    }

    Err(anyhow!("Could not find file '{}' in nearby directories.", filename))
}

/// Sets `key` in the config file, keeping every other line as it was.
fn save_setting(path: &Path, key: &str, value: &str) -> Result<()> {
    let existing = if path.exists() {
        fs::read_to_string(path).context("Failed to read config file")?
    } else {
        String::new()
    };

    let mut replaced = false;
    let mut lines: Vec<String> = existing
        .lines()
        .map(|line| match line.split_once('=') {
            Some((k, _)) if k.trim() == key => {
                replaced = true;
                format!("{}={}", key, value)
            }
            _ => line.to_string(),
        })
        .collect();
    if !replaced {
        lines.push(format!("{}={}", key, value));
    }

    fs::write(path, lines.join("\n") + "\n").context("Failed to write config file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::analyzer::Alignment;

    fn scratch_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("motion-diff-config-{}-{}", name, std::process::id()))
    }

    #[test]
    fn test_missing_file_gives_defaults() -> Result<()> {
        let config = PipelineConfig::load(&scratch_file("absent"))?;
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.threshold, 10.0);
        assert_eq!(config.frame_radius, 2);
        Ok(())
    }

    #[test]
    fn test_load_overrides_from_file() -> Result<()> {
        let path = scratch_file("load");
        fs::write(
            &path,
            "# coaching setup\nDEVIATION_THRESHOLD=12.5\nFRAME_RADIUS = 4\nALIGNMENT=resample\n\
             ASSET_KIND=overlay\nMEDIA_DIR=/srv/media\nCOMPRESSION_LEVEL=9\nUNRELATED=1\n",
        )?;

        let config = PipelineConfig::load(&path)?;
        assert_eq!(config.threshold, 12.5);
        assert_eq!(config.frame_radius, 4);
        assert_eq!(config.analyzer.alignment, Alignment::Resample);
        assert_eq!(config.asset_kind, AssetKind::Overlay);
        assert_eq!(config.media_dir, PathBuf::from("/srv/media"));
        assert_eq!(config.compression_level, Some(9));

        fs::remove_file(path)?;
        Ok(())
    }

    #[test]
    fn test_invalid_values_are_rejected() -> Result<()> {
        let path = scratch_file("invalid");
        fs::write(&path, "DEVIATION_THRESHOLD=-1\n")?;
        assert!(PipelineConfig::load(&path).is_err());

        fs::write(&path, "FRAME_RADIUS=two\n")?;
        assert!(PipelineConfig::load(&path).is_err());

        fs::write(&path, "SAMPLE_INTERVAL_SECS=0\n")?;
        assert!(PipelineConfig::load(&path).is_err());

        fs::write(&path, "COMPRESSION_LEVEL=12\n")?;
        assert!(PipelineConfig::load(&path).is_err());

        fs::remove_file(path)?;
        Ok(())
    }

    #[test]
    fn test_save_setting_keeps_other_lines() -> Result<()> {
        let path = scratch_file("save");
        fs::write(&path, "FRAME_RADIUS=3\nPOSE_MODEL_PATH=/old/pose.onnx\n")?;

        save_setting(&path, MODEL_KEY, "/tmp/pose.onnx")?;
        let content = fs::read_to_string(&path)?;
        assert_eq!(content, "FRAME_RADIUS=3\nPOSE_MODEL_PATH=/tmp/pose.onnx\n");

        fs::remove_file(&path)?;
        save_setting(&path, MODEL_KEY, "/tmp/pose.onnx")?;
        assert_eq!(fs::read_to_string(&path)?, "POSE_MODEL_PATH=/tmp/pose.onnx\n");

        let loaded = PipelineConfig::load(&path)?;
        assert_eq!(loaded.model_path, Some(PathBuf::from("/tmp/pose.onnx")));

        fs::remove_file(path)?;
        Ok(())
    }
}
