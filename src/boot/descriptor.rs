//! Descriptor parsing and validation.
//!
//! The descriptor is consumed as an opaque `serde_json::Value` tree through
//! small typed accessors, so every failure can name the offending field.
//! Validation order is fixed: version, machine, memory size, file
//! references, drives, filesystems, ethernet interfaces, display, input
//! device, acceleration, RTC mode, command line.

use chrono::Local;
use serde_json::Value;
use thiserror::Error;

use super::{Accel, BootConfig, DisplayConfig, DriveEntry, EthEntry, FileSlot, FsEntry};
use crate::machine::is_known_machine;

/// Descriptor format version this driver understands.
pub const DESCRIPTOR_VERSION: i64 = 1;

/// Ethernet drivers that need a host interface name.
const TAP_DRIVER: &str = "tap";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("descriptor is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("descriptor must be a JSON object")]
    NotAnObject,

    #[error("expecting '{0}' property")]
    MissingField(String),

    #[error("{field}: {expected} expected")]
    WrongType {
        field: String,
        expected: &'static str,
    },

    #[error("configuration file version {found} is too old (supported version is 1)")]
    VersionTooOld { found: i64 },

    #[error("configuration file version {found} is not supported: the emulator is too old")]
    VersionTooNew { found: i64 },

    #[error("unknown machine type '{0}'")]
    UnknownMachine(String),

    #[error("accel: unsupported value '{0}'")]
    UnknownAccel(String),
}

// ---------------------------------------------------------------------------
// Field accessors
//
// Each distinguishes absent / present-but-wrong-type / valid.
// ---------------------------------------------------------------------------

fn get_int(obj: &Value, name: &str) -> Result<i64, ConfigError> {
    match obj.get(name) {
        None => Err(ConfigError::MissingField(name.to_string())),
        Some(value) => value.as_i64().ok_or_else(|| ConfigError::WrongType {
            field: name.to_string(),
            expected: "integer",
        }),
    }
}

fn get_str(obj: &Value, name: &str) -> Result<String, ConfigError> {
    match obj.get(name) {
        None => Err(ConfigError::MissingField(name.to_string())),
        Some(value) => value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ConfigError::WrongType {
                field: name.to_string(),
                expected: "string",
            }),
    }
}

fn get_str_opt(obj: &Value, name: &str) -> Result<Option<String>, ConfigError> {
    match obj.get(name) {
        None => Ok(None),
        Some(value) => value
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| ConfigError::WrongType {
                field: name.to_string(),
                expected: "string",
            }),
    }
}

fn get_bool_opt(obj: &Value, name: &str) -> Result<Option<bool>, ConfigError> {
    match obj.get(name) {
        None => Ok(None),
        Some(value) => value
            .as_bool()
            .map(Some)
            .ok_or_else(|| ConfigError::WrongType {
                field: name.to_string(),
                expected: "boolean",
            }),
    }
}

fn get_dimension(obj: &Value, name: &str) -> Result<u32, ConfigError> {
    let n = get_int(obj, name)?;
    u32::try_from(n).map_err(|_| ConfigError::WrongType {
        field: name.to_string(),
        expected: "positive integer",
    })
}

/// Indexed entry (`drive0`, `fs1`, …): absent terminates the walk, anything
/// but an object is a field-named error.
fn get_entry<'a>(obj: &'a Value, name: &str) -> Result<Option<&'a Value>, ConfigError> {
    match obj.get(name) {
        None => Ok(None),
        Some(value) if value.is_object() => Ok(Some(value)),
        Some(_) => Err(ConfigError::WrongType {
            field: name.to_string(),
            expected: "object",
        }),
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse and validate descriptor bytes into a [`BootConfig`] whose file
/// slots carry filenames but no blobs yet.
pub fn parse_descriptor(bytes: &[u8]) -> Result<BootConfig, ConfigError> {
    let root: Value = serde_json::from_slice(bytes)?;
    if !root.is_object() {
        return Err(ConfigError::NotAnObject);
    }

    let version = get_int(&root, "version")?;
    if version != DESCRIPTOR_VERSION {
        return Err(if version > DESCRIPTOR_VERSION {
            ConfigError::VersionTooNew { found: version }
        } else {
            ConfigError::VersionTooOld { found: version }
        });
    }

    let machine = get_str(&root, "machine")?;
    if !is_known_machine(&machine) {
        return Err(ConfigError::UnknownMachine(machine));
    }

    let memory_mb = get_int(&root, "memory_size")?;
    if memory_mb <= 0 {
        return Err(ConfigError::WrongType {
            field: "memory_size".to_string(),
            expected: "positive integer",
        });
    }
    let memory_bytes = (memory_mb as u64) << 20;

    let mut config = BootConfig {
        machine,
        memory_bytes,
        ..Default::default()
    };

    config.file_mut(FileSlot::Bios).filename = get_str_opt(&root, "bios")?;
    config.file_mut(FileSlot::Kernel).filename = get_str_opt(&root, "kernel")?;
    config.file_mut(FileSlot::Initrd).filename = get_str_opt(&root, "initrd")?;

    for index in 0.. {
        let Some(entry) = get_entry(&root, &format!("drive{index}"))? else {
            break;
        };
        config.drives.push(DriveEntry {
            file: get_str(entry, "file")?,
            device: get_str_opt(entry, "device")?,
        });
    }

    for index in 0.. {
        let Some(entry) = get_entry(&root, &format!("fs{index}"))? else {
            break;
        };
        let tag = match get_str_opt(entry, "tag")? {
            Some(tag) => tag,
            None if index == 0 => "/dev/root".to_string(),
            None => format!("/dev/root{index}"),
        };
        config.filesystems.push(FsEntry {
            file: get_str(entry, "file")?,
            tag,
        });
    }

    for index in 0.. {
        let Some(entry) = get_entry(&root, &format!("eth{index}"))? else {
            break;
        };
        let driver = get_str(entry, "driver")?;
        let ifname = if driver == TAP_DRIVER {
            Some(get_str(entry, "ifname")?)
        } else {
            get_str_opt(entry, "ifname")?
        };
        config.interfaces.push(EthEntry { driver, ifname });
    }

    if let Some(display) = get_entry(&root, "display0")? {
        config.display = Some(DisplayConfig {
            device: get_str(display, "device")?,
            width: get_dimension(display, "width")?,
            height: get_dimension(display, "height")?,
        });
        config.file_mut(FileSlot::VgaBios).filename = get_str_opt(display, "vga_bios")?;
    }

    config.input_device = get_str_opt(&root, "input_device")?;

    config.accel = match get_str_opt(&root, "accel")?.as_deref() {
        None => Accel::default(),
        Some("none") => Accel::None,
        Some("auto") => Accel::Auto,
        Some(other) => return Err(ConfigError::UnknownAccel(other.to_string())),
    };

    config.rtc_local_time = get_bool_opt(&root, "rtc_local_time")?.unwrap_or(false);

    config.cmdline = get_str_opt(&root, "cmdline")?.map(|raw| expand_cmdline(&raw));

    Ok(config)
}

// ---------------------------------------------------------------------------
// Command-line variable expansion
// ---------------------------------------------------------------------------

/// Expand `${VAR}` references. Only `TZ` is defined (it becomes the host's
/// current UTC offset); unknown variables expand to nothing.
fn expand_cmdline(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find("${") {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];
        let (name, next) = match after.find('}') {
            Some(end) => (&after[..end], &after[end + 1..]),
            // Unterminated reference: the name runs to the end of the line.
            None => (after, ""),
        };
        if name == "TZ" {
            out.push_str(&utc_offset_string());
        }
        rest = next;
    }
    out.push_str(rest);
    out
}

/// The host's UTC offset as `UTC±HH:MM`. POSIX TZ strings count west of UTC
/// as positive, so the sign is the opposite of the chronological offset.
fn utc_offset_string() -> String {
    let offset_minutes = Local::now().offset().local_minus_utc() / 60;
    let (sign, n) = if offset_minutes < 0 {
        ('+', -offset_minutes)
    } else {
        ('-', offset_minutes)
    };
    format!("UTC{sign}{:02}:{:02}", n / 60, n % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<BootConfig, ConfigError> {
        parse_descriptor(json.as_bytes())
    }

    const MINIMAL: &str = r#"{"version": 1, "machine": "riscv64", "memory_size": 256}"#;

    #[test]
    fn minimal_descriptor_parses() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.machine, "riscv64");
        assert_eq!(config.memory_bytes, 256 << 20);
        assert!(config.cmdline.is_none());
        assert!(config.drives.is_empty());
        for slot in FileSlot::ALL {
            assert!(config.file(slot).filename.is_none());
        }
    }

    #[test]
    fn version_mismatches_give_distinct_reasons() {
        let too_new = parse(r#"{"version": 2, "machine": "riscv64", "memory_size": 64}"#);
        let too_old = parse(r#"{"version": 0, "machine": "riscv64", "memory_size": 64}"#);

        let too_new = too_new.unwrap_err().to_string();
        let too_old = too_old.unwrap_err().to_string();
        assert_ne!(too_new, too_old);
        assert!(too_new.contains("emulator is too old"), "{too_new}");
        assert!(too_old.contains("too old"), "{too_old}");
    }

    #[test]
    fn missing_version_is_a_field_named_error() {
        let err = parse(r#"{"machine": "riscv64", "memory_size": 64}"#).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(ref f) if f == "version"));
    }

    #[test]
    fn wrong_type_is_distinguished_from_absent() {
        let err = parse(r#"{"version": 1, "machine": "riscv64", "memory_size": 64, "cmdline": 9}"#)
            .unwrap_err();
        assert!(
            matches!(err, ConfigError::WrongType { ref field, expected: "string" } if field == "cmdline")
        );
    }

    #[test]
    fn unknown_machine_is_rejected() {
        let err = parse(r#"{"version": 1, "machine": "vax", "memory_size": 64}"#).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownMachine(ref m) if m == "vax"));
    }

    #[test]
    fn memory_size_is_megabytes() {
        let config = parse(r#"{"version": 1, "machine": "pc", "memory_size": 1}"#).unwrap();
        assert_eq!(config.memory_bytes, 1 << 20);
    }

    #[test]
    fn negative_memory_size_is_rejected() {
        let err = parse(r#"{"version": 1, "machine": "pc", "memory_size": -64}"#).unwrap_err();
        assert!(matches!(err, ConfigError::WrongType { ref field, .. } if field == "memory_size"));
    }

    #[test]
    fn drives_stop_at_the_first_missing_index() {
        let config = parse(
            r#"{"version": 1, "machine": "riscv64", "memory_size": 64,
                "drive0": {"file": "a.img"},
                "drive2": {"file": "c.img"}}"#,
        )
        .unwrap();
        assert_eq!(config.drives.len(), 1);
        assert_eq!(config.drives[0].file, "a.img");
        assert!(config.drives[0].device.is_none());
    }

    #[test]
    fn drive_without_file_fails() {
        let err = parse(
            r#"{"version": 1, "machine": "riscv64", "memory_size": 64,
                "drive0": {"device": "virtio"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(ref f) if f == "file"));
    }

    #[test]
    fn fs_tags_default_by_index() {
        let config = parse(
            r#"{"version": 1, "machine": "riscv64", "memory_size": 64,
                "fs0": {"file": "root.bin"},
                "fs1": {"file": "extra.bin"},
                "fs2": {"file": "named.bin", "tag": "/dev/data"}}"#,
        )
        .unwrap();
        assert_eq!(config.filesystems[0].tag, "/dev/root");
        assert_eq!(config.filesystems[1].tag, "/dev/root1");
        assert_eq!(config.filesystems[2].tag, "/dev/data");
    }

    #[test]
    fn tap_interface_requires_ifname() {
        let err = parse(
            r#"{"version": 1, "machine": "riscv64", "memory_size": 64,
                "eth0": {"driver": "tap"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(ref f) if f == "ifname"));

        let config = parse(
            r#"{"version": 1, "machine": "riscv64", "memory_size": 64,
                "eth0": {"driver": "user"}}"#,
        )
        .unwrap();
        assert!(config.interfaces[0].ifname.is_none());
    }

    #[test]
    fn display_block_fills_the_vga_bios_slot() {
        let config = parse(
            r#"{"version": 1, "machine": "pc", "memory_size": 64,
                "display0": {"device": "simplefb", "width": 1024, "height": 768,
                             "vga_bios": "vgabios.bin"}}"#,
        )
        .unwrap();
        let display = config.display.as_ref().unwrap();
        assert_eq!(display.device, "simplefb");
        assert_eq!((display.width, display.height), (1024, 768));
        assert_eq!(
            config.file(FileSlot::VgaBios).filename.as_deref(),
            Some("vgabios.bin")
        );
    }

    #[test]
    fn accel_accepts_none_and_auto_only() {
        let none = parse(
            r#"{"version": 1, "machine": "pc", "memory_size": 64, "accel": "none"}"#,
        )
        .unwrap();
        assert_eq!(none.accel, Accel::None);

        assert_eq!(parse(MINIMAL).unwrap().accel, Accel::Auto);

        let err = parse(
            r#"{"version": 1, "machine": "pc", "memory_size": 64, "accel": "fast"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAccel(ref v) if v == "fast"));
    }

    #[test]
    fn tz_reference_is_substituted() {
        let config = parse(
            r#"{"version": 1, "machine": "riscv64", "memory_size": 64,
                "cmdline": "console=hvc0 TZ=${TZ} rw"}"#,
        )
        .unwrap();
        let cmdline = config.cmdline.unwrap();
        assert!(!cmdline.contains("${TZ}"));
        // UTC±HH:MM is 9 characters.
        let start = cmdline.find("TZ=UTC").expect("substituted offset");
        let offset = &cmdline[start + 3..start + 12];
        assert!(offset.starts_with("UTC"));
        assert!(matches!(offset.as_bytes()[3], b'+' | b'-'));
        assert_eq!(&offset[6..7], ":");
    }

    #[test]
    fn unknown_variables_expand_to_nothing() {
        assert_eq!(expand_cmdline("a ${NOPE} b"), "a  b");
        assert_eq!(expand_cmdline("tail ${NOPE"), "tail ");
        assert_eq!(expand_cmdline("plain"), "plain");
    }

    #[test]
    fn utc_offset_has_the_documented_shape() {
        let s = utc_offset_string();
        assert_eq!(s.len(), 9);
        assert!(s.starts_with("UTC"));
        assert_eq!(&s[6..7], ":");
    }

    #[test]
    fn non_object_descriptor_is_rejected() {
        assert!(matches!(parse("[1, 2]"), Err(ConfigError::NotAnObject)));
        assert!(matches!(parse("not json"), Err(ConfigError::Json(_))));
    }
}
