//! GPU detection and encoder selection.
//!
//! Detection shells out to `nvidia-smi` / `rocm-smi` once at startup. The
//! resulting [`HardwareInfo`] is immutable and maps to an [`EncoderProfile`]
//! that the assembler uses for its accelerated attempt.

use std::fmt;
use std::process::Command;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// GPU vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpuVendor {
    Nvidia,
    Amd,
}

impl fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuVendor::Nvidia => write!(f, "NVIDIA"),
            GpuVendor::Amd => write!(f, "AMD"),
        }
    }
}

/// Which GPU family to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuPreference {
    #[default]
    Auto,
    Nvidia,
    Amd,
    None,
}

impl FromStr for GpuPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "nvidia" => Ok(Self::Nvidia),
            "amd" => Ok(Self::Amd),
            "none" => Ok(Self::None),
            other => Err(format!("unknown GPU type '{}'", other)),
        }
    }
}

/// Hardware detection settings.
#[derive(Debug, Clone)]
pub struct HardwareConfig {
    /// Whether GPU acceleration may be used at all
    pub use_gpu: bool,
    /// Restrict detection to one vendor
    pub preference: GpuPreference,
    /// Share of free GPU memory the encoder may claim
    pub memory_safety_factor: f64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            use_gpu: true,
            preference: GpuPreference::Auto,
            memory_safety_factor: 0.7,
        }
    }
}

/// Detected GPU, if any.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareInfo {
    pub vendor: Option<GpuVendor>,
    pub model: Option<String>,
    pub total_memory_mb: u64,
    pub available_memory_mb: u64,
    pub driver_version: Option<String>,
}

impl HardwareInfo {
    /// No usable GPU.
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether a GPU was detected.
    pub fn is_available(&self) -> bool {
        self.vendor.is_some()
    }

    /// Detect the GPU according to `config`.
    ///
    /// Blocking; call once at startup (or from `spawn_blocking`).
    pub fn detect(config: &HardwareConfig) -> Self {
        if !config.use_gpu || config.preference == GpuPreference::None {
            info!("GPU acceleration disabled via configuration");
            return Self::none();
        }

        let info = match config.preference {
            GpuPreference::Nvidia => detect_nvidia(),
            GpuPreference::Amd => detect_amd(),
            _ => detect_nvidia().or_else(detect_amd),
        };

        match info {
            Some(info) => {
                info!(
                    vendor = ?info.vendor,
                    model = info.model.as_deref().unwrap_or("unknown"),
                    available_mb = info.available_memory_mb,
                    total_mb = info.total_memory_mb,
                    safe_limit_mb = info.safe_memory_limit_mb(config.memory_safety_factor),
                    "GPU detected"
                );
                info
            }
            None => {
                info!("No GPU detected, using software encoding");
                Self::none()
            }
        }
    }

    /// Memory budget for GPU work, in MB.
    ///
    /// `available * factor`, kept within `[min(512, 30% of total), 90% of total]`.
    pub fn safe_memory_limit_mb(&self, safety_factor: f64) -> u64 {
        if !self.is_available() || self.available_memory_mb == 0 {
            return 0;
        }

        let limit = (self.available_memory_mb as f64 * safety_factor) as u64;
        let min_allocation = 512.min((self.total_memory_mb as f64 * 0.3) as u64);
        let max_allocation = (self.total_memory_mb as f64 * 0.9) as u64;

        min_allocation.max(limit.min(max_allocation))
    }
}

impl fmt::Display for HardwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.vendor {
            None => write!(f, "No GPU detected"),
            Some(vendor) => write!(
                f,
                "{} {} with {}MB/{}MB memory available",
                vendor,
                self.model.as_deref().unwrap_or("unknown"),
                self.available_memory_mb,
                self.total_memory_mb
            ),
        }
    }
}

fn run_tool(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        debug!(program, "GPU query exited with {}", output.status);
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn detect_nvidia() -> Option<HardwareInfo> {
    let stdout = run_tool(
        "nvidia-smi",
        &[
            "--query-gpu=name,memory.total,memory.free,driver_version",
            "--format=csv,noheader",
        ],
    )?;
    let parsed = parse_nvidia_smi(&stdout);
    if parsed.is_none() {
        warn!("Could not parse nvidia-smi output");
    }
    parsed
}

fn detect_amd() -> Option<HardwareInfo> {
    let meminfo = run_tool("rocm-smi", &["--showmeminfo", "vram"])?;
    let product = run_tool("rocm-smi", &["--showproductname"]).unwrap_or_default();
    Some(parse_rocm_smi(&meminfo, &product))
}

/// Parse the first row of `nvidia-smi --query-gpu=name,memory.total,memory.free,driver_version`.
fn parse_nvidia_smi(output: &str) -> Option<HardwareInfo> {
    let line = output.lines().find(|l| !l.trim().is_empty())?;
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 3 {
        return None;
    }

    Some(HardwareInfo {
        vendor: Some(GpuVendor::Nvidia),
        model: Some(parts[0].to_string()),
        total_memory_mb: parse_mib(parts[1]).unwrap_or(0),
        available_memory_mb: parse_mib(parts[2]).unwrap_or(0),
        driver_version: parts.get(3).map(|s| s.to_string()),
    })
}

fn parse_mib(value: &str) -> Option<u64> {
    value.trim().trim_end_matches("MiB").trim().parse().ok()
}

/// Parse `rocm-smi --showmeminfo vram` and `--showproductname` output.
fn parse_rocm_smi(meminfo: &str, product: &str) -> HardwareInfo {
    let mut total = None;
    let mut used = None;

    for line in meminfo.lines() {
        let lower = line.to_lowercase();
        let value = line
            .rsplit(':')
            .next()
            .and_then(|v| v.trim().parse::<u64>().ok());
        if lower.contains("vram total memory") {
            total = value.map(|b| to_mb(b, &lower));
        } else if lower.contains("vram total used memory") || lower.contains("vram used memory") {
            used = value.map(|b| to_mb(b, &lower));
        }
    }

    let model = product
        .lines()
        .find_map(|line| {
            let (_, name) = line.split_once(':')?;
            let name = name.trim();
            (line.trim_start().starts_with("GPU[") && !name.is_empty())
                .then(|| name.rsplit(':').next().unwrap_or(name).trim().to_string())
        })
        .unwrap_or_else(|| "Unknown AMD GPU".to_string());

    let total_memory_mb = total.unwrap_or(0);
    HardwareInfo {
        vendor: Some(GpuVendor::Amd),
        model: Some(model),
        total_memory_mb,
        available_memory_mb: total_memory_mb.saturating_sub(used.unwrap_or(0)),
        driver_version: None,
    }
}

fn to_mb(value: u64, label: &str) -> u64 {
    if label.contains("(b)") {
        value / (1024 * 1024)
    } else {
        value
    }
}

/// FFmpeg arguments for one encoder choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderProfile {
    /// Short name used in logs
    pub name: &'static str,
    /// Arguments placed before `-i`
    pub input_args: Vec<String>,
    /// Video encoding arguments
    pub video_args: Vec<String>,
}

impl EncoderProfile {
    /// CPU encoding with libx264.
    pub fn software() -> Self {
        Self {
            name: "libx264",
            input_args: Vec::new(),
            video_args: strings(&["-c:v", "libx264", "-preset", "medium"]),
        }
    }

    /// Accelerated profile for the detected GPU, if any.
    pub fn accelerated(hardware: &HardwareInfo) -> Option<Self> {
        match hardware.vendor? {
            GpuVendor::Nvidia => Some(Self {
                name: "h264_nvenc",
                input_args: strings(&["-hwaccel", "cuda", "-hwaccel_output_format", "cuda"]),
                video_args: strings(&[
                    "-c:v", "h264_nvenc", "-preset", "p4", "-tune", "hq", "-b:v", "5M",
                    "-maxrate", "8M", "-bufsize", "10M",
                ]),
            }),
            GpuVendor::Amd => Some(Self {
                name: "h264_amf",
                input_args: Vec::new(),
                video_args: strings(&["-c:v", "h264_amf", "-quality", "quality"]),
            }),
        }
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nvidia(total: u64, available: u64) -> HardwareInfo {
        HardwareInfo {
            vendor: Some(GpuVendor::Nvidia),
            model: Some("RTX".to_string()),
            total_memory_mb: total,
            available_memory_mb: available,
            driver_version: None,
        }
    }

    #[test]
    fn test_parse_nvidia_smi() {
        let info = parse_nvidia_smi("NVIDIA GeForce RTX 3080, 10240 MiB, 9000 MiB, 535.54.03\n").unwrap();
        assert_eq!(info.vendor, Some(GpuVendor::Nvidia));
        assert_eq!(info.model.as_deref(), Some("NVIDIA GeForce RTX 3080"));
        assert_eq!(info.total_memory_mb, 10240);
        assert_eq!(info.available_memory_mb, 9000);
        assert_eq!(info.driver_version.as_deref(), Some("535.54.03"));
    }

    #[test]
    fn test_parse_nvidia_smi_rejects_garbage() {
        assert!(parse_nvidia_smi("").is_none());
        assert!(parse_nvidia_smi("No devices were found").is_none());
    }

    #[test]
    fn test_parse_rocm_smi() {
        let meminfo = "GPU[0]\t\t: VRAM Total Memory (B): 17163091968\nGPU[0]\t\t: VRAM Total Used Memory (B): 1073741824\n";
        let product = "GPU[0]\t\t: Card series: \t\tRadeon RX 6800\n";
        let info = parse_rocm_smi(meminfo, product);
        assert_eq!(info.vendor, Some(GpuVendor::Amd));
        assert_eq!(info.total_memory_mb, 16368);
        assert_eq!(info.available_memory_mb, 15344);
        assert_eq!(info.model.as_deref(), Some("Radeon RX 6800"));
    }

    #[test]
    fn test_safe_memory_limit() {
        // 8000 * 0.7 = 5600, within bounds
        assert_eq!(nvidia(10000, 8000).safe_memory_limit_mb(0.7), 5600);
        // capped at 90% of total
        assert_eq!(nvidia(1000, 1000).safe_memory_limit_mb(1.0), 900);
        // raised to the minimum allocation
        assert_eq!(nvidia(4000, 100).safe_memory_limit_mb(0.7), 512);
        assert_eq!(HardwareInfo::none().safe_memory_limit_mb(0.7), 0);
    }

    #[test]
    fn test_gpu_preference_parsing() {
        assert_eq!("AUTO".parse::<GpuPreference>().unwrap(), GpuPreference::Auto);
        assert_eq!("nvidia".parse::<GpuPreference>().unwrap(), GpuPreference::Nvidia);
        assert_eq!("none".parse::<GpuPreference>().unwrap(), GpuPreference::None);
        assert!("intel".parse::<GpuPreference>().is_err());
    }

    #[test]
    fn test_detect_disabled() {
        let config = HardwareConfig {
            use_gpu: false,
            ..Default::default()
        };
        assert!(!HardwareInfo::detect(&config).is_available());
    }

    #[test]
    fn test_encoder_profiles() {
        assert!(EncoderProfile::accelerated(&HardwareInfo::none()).is_none());

        let profile = EncoderProfile::accelerated(&nvidia(8000, 8000)).unwrap();
        assert_eq!(profile.name, "h264_nvenc");
        assert!(profile.input_args.contains(&"cuda".to_string()));

        let software = EncoderProfile::software();
        assert!(software.input_args.is_empty());
        assert!(software.video_args.contains(&"libx264".to_string()));
    }
}
