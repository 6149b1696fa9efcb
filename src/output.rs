use anyhow::Result;
use colony_common::{History, Snapshot, Trajectory};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// On-disk encodings shared by trajectory input and snapshot output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Json,
    Bincode,
    MessagePack,
}

impl DataFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "json" => Some(DataFormat::Json),
            "bincode" | "bin" => Some(DataFormat::Bincode),
            "messagepack" | "msgpack" => Some(DataFormat::MessagePack),
            _ => None,
        }
    }

    /// Guesses the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension().and_then(|ext| ext.to_str()).and_then(Self::from_name)
    }

    /// Format named in the config, falling back to JSON on unknown names.
    pub fn from_config(name: Option<&str>) -> Self {
        match name {
            None => DataFormat::Json,
            Some(name) => Self::from_name(name).unwrap_or_else(|| {
                warn!("Unknown output format: {}. Using JSON instead.", name);
                DataFormat::Json
            }),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            DataFormat::Json => "json",
            DataFormat::Bincode => "bin",
            DataFormat::MessagePack => "msgpack",
        }
    }
}

fn write_value<T: Serialize + ?Sized>(path: &Path, value: &T, format: DataFormat) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| anyhow::anyhow!("Error creating file '{}': {}", path.display(), e))?;
    let mut writer = BufWriter::new(file);
    match format {
        DataFormat::Json => serde_json::to_writer(&mut writer, value)
            .map_err(|e| anyhow::anyhow!("Error serializing to JSON: {}", e))?,
        DataFormat::Bincode => bincode::serialize_into(&mut writer, value)
            .map_err(|e| anyhow::anyhow!("Error serializing to bincode: {}", e))?,
        DataFormat::MessagePack => rmp_serde::encode::write(&mut writer, value)
            .map_err(|e| anyhow::anyhow!("Error serializing to MessagePack: {}", e))?,
    }
    writer
        .flush()
        .map_err(|e| anyhow::anyhow!("Error writing '{}': {}", path.display(), e))?;
    Ok(())
}

fn read_value<T: DeserializeOwned>(path: &Path, format: DataFormat) -> Result<T> {
    let file = File::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to open '{}': {}", path.display(), e))?;
    let reader = BufReader::new(file);
    let value = match format {
        DataFormat::Json => serde_json::from_reader(reader)
            .map_err(|e| anyhow::anyhow!("Invalid JSON in '{}': {}", path.display(), e))?,
        DataFormat::Bincode => bincode::deserialize_from(reader)
            .map_err(|e| anyhow::anyhow!("Invalid bincode in '{}': {}", path.display(), e))?,
        DataFormat::MessagePack => rmp_serde::decode::from_read(reader)
            .map_err(|e| anyhow::anyhow!("Invalid MessagePack in '{}': {}", path.display(), e))?,
    };
    Ok(value)
}

/// Reads a recorded trajectory. Without an explicit format the extension decides.
pub fn load_trajectory<P: AsRef<Path>>(path: P, format: Option<&str>) -> Result<Trajectory> {
    let path = path.as_ref();
    let format = match format {
        Some(name) => DataFormat::from_name(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown trajectory format '{}'.", name))?,
        None => DataFormat::from_path(path).ok_or_else(|| {
            anyhow::anyhow!("Cannot infer the format of '{}'; set input.format.", path.display())
        })?,
    };
    let trajectory: Trajectory = read_value(path, format)?;
    info!(
        "Read trajectory '{}' ({:?}): {} steps, {} agent records.",
        path.display(),
        format,
        trajectory.len(),
        trajectory.agent_count()
    );
    Ok(trajectory)
}

pub fn save_trajectory<P: AsRef<Path>>(path: P, trajectory: &Trajectory, format: DataFormat) -> Result<()> {
    write_value(path.as_ref(), trajectory, format)
}

/// Writes every recorded snapshot to `<base>_snapshots.<ext>` and returns the path.
pub fn write_snapshots(base_filename: &str, snapshots: &[Snapshot], format: DataFormat) -> Result<PathBuf> {
    let path = PathBuf::from(format!("{}_snapshots.{}", base_filename, format.extension()));
    write_value(&path, snapshots, format)?;
    info!("All {} snapshots saved to {} ({:?} format)", snapshots.len(), path.display(), format);
    Ok(path)
}

pub fn read_snapshots<P: AsRef<Path>>(path: P, format: DataFormat) -> Result<Vec<Snapshot>> {
    read_value(path.as_ref(), format)
}

/// One row per step; named series become `species:<name>` and `field:<name>` columns.
pub fn write_history_csv<P: AsRef<Path>>(path: P, history: &History) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| anyhow::anyhow!("Error creating CSV file '{}': {}", path.display(), e))?;

    let mut header: Vec<String> = ["step", "time_s", "total", "count_a", "count_b", "mean_similarity"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend(history.species_means.keys().map(|name| format!("species:{}", name)));
    header.extend(history.field_means.keys().map(|name| format!("field:{}", name)));
    writer.write_record(&header)?;

    for row in 0..history.len() {
        let mut record = vec![
            history.steps[row].to_string(),
            format!("{:.4}", history.time[row]),
            history.total[row].to_string(),
            history.count_a[row].to_string(),
            history.count_b[row].to_string(),
            format!("{:.6}", history.mean_similarity[row]),
        ];
        let series = history.species_means.values().chain(history.field_means.values());
        record.extend(series.map(|values| values.get(row).map(|v| format!("{:.6e}", v)).unwrap_or_default()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    info!("History ({} rows) saved to {}", history.len(), path.display());
    Ok(())
}
