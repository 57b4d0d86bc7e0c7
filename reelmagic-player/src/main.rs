//! # ReelMagic Asset Probe
//!
//! Headless inspection of a ReelMagic MPEG asset: reads the first sequence
//! header and, for magical picture_rate codes, recovers the f_code the player
//! would apply.
//!
//! ```text
//! reelmagic <file> [--key auto|common|thehorde|HEX] [--fcode 0-7] [--config settings.json]
//! ```

use std::io;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use reelmagic_core::bitstream::{BitBuffer, SequenceHeader};
use reelmagic_core::magic_key::MagicKeyResolver;
use reelmagic_core::ReelMagicSettings;

// ============================================================================
// Arguments
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct ProbeOptions {
    input: PathBuf,
    key: Option<String>,
    fcode: Option<i32>,
    config: Option<PathBuf>,
}

fn print_usage() {
    eprintln!("Usage: reelmagic <file> [--key auto|common|thehorde|HEX] [--fcode 0-7] [--config settings.json]");
}

fn parse_args(args: &[String]) -> Result<ProbeOptions> {
    let mut input: Option<PathBuf> = None;
    let mut key = None;
    let mut fcode = None;
    let mut config = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--key" | "-k" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("Missing value for --key"))?;
                key = Some(value.clone());
                i += 2;
            }
            "--fcode" | "-f" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("Missing value for --fcode"))?;
                let code = value
                    .parse::<i32>()
                    .map_err(|e| anyhow!("Invalid f_code {}: {}", value, e))?;
                fcode = Some(code);
                i += 2;
            }
            "--config" | "-c" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("Missing value for --config"))?;
                config = Some(PathBuf::from(value));
                i += 2;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other if other.starts_with('-') => {
                return Err(anyhow!("Unknown option {}", other));
            }
            other => {
                input = Some(PathBuf::from(other));
                i += 1;
            }
        }
    }

    let input = input.ok_or_else(|| {
        print_usage();
        anyhow!("Missing input file")
    })?;

    Ok(ProbeOptions {
        input,
        key,
        fcode,
        config,
    })
}

fn resolve_settings(options: &ProbeOptions) -> Result<ReelMagicSettings> {
    let mut settings = match &options.config {
        Some(path) => ReelMagicSettings::load(path)
            .with_context(|| format!("Failed to load settings from {:?}", path))?,
        None => ReelMagicSettings::default(),
    };
    if let Some(key) = &options.key {
        settings.magic_key = key.clone();
    }
    if let Some(fcode) = options.fcode {
        settings.fcode = fcode;
    }
    Ok(settings)
}

// ============================================================================
// Probe
// ============================================================================

#[derive(Debug, Serialize)]
struct ProbeReport {
    file: String,
    size: usize,
    width: u16,
    height: u16,
    picture_rate_code: u8,
    framerate: f64,
    magical: bool,
    magic_key: String,
    /// 0 when no truthful f_code was found
    f_code: u8,
    f_code_overridden: bool,
}

fn probe(name: &str, bytes: Vec<u8>, settings: &ReelMagicSettings) -> Result<ProbeReport> {
    let size = bytes.len();
    let mut bits = BitBuffer::new(bytes);
    let header = SequenceHeader::find(&mut bits)
        .ok_or_else(|| anyhow!("No MPEG sequence header in {}", name))?;

    let key = settings.initial_magic_key();
    let forced = settings.fcode_override();
    let mut f_code = 0;
    if header.is_magical() {
        info!("Detected a magical picture_rate code of 0x{:X}", header.picture_rate_code);
        f_code = if forced != 0 {
            forced
        } else {
            bits.rewind();
            MagicKeyResolver::new(key).scan(&mut bits)
        };
        if f_code == 0 {
            warn!("No magical f_code found. Playback will likely be screwed up");
        }
    }

    Ok(ProbeReport {
        file: name.to_string(),
        size,
        width: header.width,
        height: header.height,
        picture_rate_code: header.picture_rate_code,
        framerate: header.effective_framerate(),
        magical: header.is_magical(),
        magic_key: format!("0x{:08X}", key),
        f_code,
        f_code_overridden: header.is_magical() && forced != 0,
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("reelmagic=info".parse()?)
                .add_directive("reelmagic_core=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args)?;
    let settings = resolve_settings(&options)?;

    info!("ReelMagic probe v{} on {:?}", reelmagic_core::VERSION, options.input);
    let bytes = std::fs::read(&options.input)
        .with_context(|| format!("Failed to read {:?}", options.input))?;
    let name = options
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| options.input.display().to_string());

    let report = probe(&name, bytes, &settings)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("reelmagic")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    /// Sequence header with the given rate code, followed by picture headers
    fn asset(rate_code: u8, pictures: &[(u16, u8, u8)]) -> Vec<u8> {
        // 352x240, aspect 1
        let mut bytes = vec![0x00, 0x00, 0x01, 0xB3, 0x16, 0x00, 0xF0, 0x10 | rate_code];
        bytes.extend_from_slice(&[0xFF, 0xFF, 0xE0, 0x00]);
        for &(tsn, kind, f_code) in pictures {
            // tsn(10) type(3) vbv(16) full_pel(1) f_code(3), padded to 5 bytes
            let mut word: u64 = (tsn as u64) << 30;
            word |= (kind as u64) << 27;
            word |= 0xFFFF << 11;
            word |= (f_code as u64) << 7;
            bytes.extend_from_slice(&[0x00, 0x00, 0x01, 0x00]);
            bytes.extend_from_slice(&word.to_be_bytes()[3..8]);
        }
        bytes
    }

    #[test]
    fn test_parse_args() {
        let options = parse_args(&args(&["HELLO.MPG", "--key", "thehorde", "--fcode", "3"])).unwrap();
        assert_eq!(options.input, PathBuf::from("HELLO.MPG"));
        assert_eq!(options.key.as_deref(), Some("thehorde"));
        assert_eq!(options.fcode, Some(3));
        assert_eq!(options.config, None);
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args(&args(&["--key", "common"])).is_err());
        assert!(parse_args(&args(&["A.MPG", "--fcode"])).is_err());
        assert!(parse_args(&args(&["A.MPG", "--fcode", "x"])).is_err());
        assert!(parse_args(&args(&["A.MPG", "--bogus"])).is_err());
    }

    #[test]
    fn test_cli_overrides_settings_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "magic_key": "thehorde", "fcode": 2 }}"#).unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let options = parse_args(&args(&["A.MPG", "--config", &path, "--fcode", "5"])).unwrap();
        let settings = resolve_settings(&options).unwrap();
        assert_eq!(settings.magic_key, "thehorde");
        assert_eq!(settings.fcode, 5);
    }

    #[test]
    fn test_probe_magical_asset() {
        let bytes = asset(0xC, &[(2, 2, 1), (3, 2, 5), (8, 2, 3)]);
        let report = probe("MAGIC.MPG", bytes, &ReelMagicSettings::default()).unwrap();

        assert_eq!((report.width, report.height), (352, 240));
        assert!(report.magical);
        assert_eq!(report.framerate, 29.970);
        assert_eq!(report.f_code, 5);
        assert!(!report.f_code_overridden);
    }

    #[test]
    fn test_probe_plain_asset_skips_scan() {
        let bytes = asset(0x5, &[(3, 2, 5)]);
        let report = probe("PLAIN.MPG", bytes, &ReelMagicSettings::default()).unwrap();
        assert!(!report.magical);
        assert_eq!(report.framerate, 30.0);
        assert_eq!(report.f_code, 0);
    }

    #[test]
    fn test_probe_override() {
        let settings = ReelMagicSettings {
            fcode: 4,
            ..ReelMagicSettings::default()
        };
        let report = probe("MAGIC.MPG", asset(0xD, &[(3, 2, 5)]), &settings).unwrap();
        assert_eq!(report.f_code, 4);
        assert!(report.f_code_overridden);
    }

    #[test]
    fn test_probe_without_sequence_header() {
        assert!(probe("JUNK.BIN", vec![0xAB; 64], &ReelMagicSettings::default()).is_err());
    }
}
