//! Segment naming conventions.

use frametap_common::consts::DEFAULT_SEGMENT_PREFIX;
use rand::Rng;

/// Encodes the conventions used to name shared memory segments.
///
/// All names derive from `{prefix}_{salt}_{kind}[_{key}]`. The salt is
/// either caller-provided (a consumer must use the producer's salt) or a
/// random 8-hex-digit value.
#[derive(Debug, Clone)]
pub struct SegmentNamer {
    prefix: String,
    salt: String,
}

impl SegmentNamer {
    /// Creates a namer with an optional custom prefix and salt.
    pub fn new(prefix: Option<String>, salt: Option<String>) -> Self {
        Self {
            prefix: prefix.unwrap_or_else(|| DEFAULT_SEGMENT_PREFIX.to_string()),
            salt: salt.unwrap_or_else(|| format!("{:08x}", rand::thread_rng().gen::<u32>())),
        }
    }

    /// Name of the introspection segment.
    pub fn introspection_name(&self) -> String {
        format!("{}_{}_int", self.prefix, self.salt)
    }

    /// Name of the system telemetry segment.
    pub fn system_name(&self) -> String {
        format!("{}_{}_sys", self.prefix, self.salt)
    }

    /// Name of a GPU telemetry segment.
    pub fn gpu_name(&self, device_id: u32) -> String {
        format!("{}_{}_gpu_{}", self.prefix, self.salt, device_id)
    }

    /// Name of a per-target frame segment.
    pub fn frame_name(&self, pid: u32) -> String {
        format!("{}_{}_tgt_{}", self.prefix, self.salt, pid)
    }

    /// The active salt.
    pub fn salt(&self) -> &str {
        &self.salt
    }

    /// The active prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_formats() {
        let namer = SegmentNamer::new(Some("pfx".into()), Some("cafe0123".into()));
        assert_eq!(namer.introspection_name(), "pfx_cafe0123_int");
        assert_eq!(namer.system_name(), "pfx_cafe0123_sys");
        assert_eq!(namer.gpu_name(2), "pfx_cafe0123_gpu_2");
        assert_eq!(namer.frame_name(4321), "pfx_cafe0123_tgt_4321");
    }

    #[test]
    fn test_random_salt_is_8_hex_digits() {
        let namer = SegmentNamer::new(None, None);
        assert_eq!(namer.salt().len(), 8);
        assert!(namer.salt().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(namer.prefix(), DEFAULT_SEGMENT_PREFIX);
    }

    #[test]
    fn test_distinct_salts() {
        let a = SegmentNamer::new(None, None);
        let b = SegmentNamer::new(None, None);
        // one-in-four-billion flake accepted
        assert_ne!(a.salt(), b.salt());
    }
}
