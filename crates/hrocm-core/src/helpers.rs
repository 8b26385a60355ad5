//! Formatting helpers for module metadata and spectra.

/// Format a packed revision word as `major.minor.patch`, with an `rcN`
/// suffix when the release-candidate byte is non-zero.
///
/// The word is packed big-end first: bits 31..24 major, 23..16 minor,
/// 15..8 patch, 7..0 release candidate.
///
/// # Example
///
/// ```
/// use hrocm_core::format_revision;
///
/// assert_eq!(format_revision(0x0102_0300), "1.2.3");
/// assert_eq!(format_revision(0x0300_0102), "3.0.1rc2");
/// ```
pub fn format_revision(word: u32) -> String {
    let major = (word >> 24) & 0xFF;
    let minor = (word >> 16) & 0xFF;
    let patch = (word >> 8) & 0xFF;
    let rc = word & 0xFF;
    if rc == 0 {
        format!("{major}.{minor}.{patch}")
    } else {
        format!("{major}.{minor}.{patch}rc{rc}")
    }
}

/// Format an optical frequency in THz with six decimal places (1 MHz).
///
/// # Example
///
/// ```
/// use hrocm_core::format_freq_thz;
///
/// assert_eq!(format_freq_thz(191.35), "191.350000 THz");
/// ```
pub fn format_freq_thz(thz: f64) -> String {
    format!("{thz:.6} THz")
}

/// Decode a fixed-width text field: stop at the first NUL, then strip
/// surrounding spaces.
///
/// # Example
///
/// ```
/// use hrocm_core::text_field;
///
/// assert_eq!(text_field(b"  FNS1234  \0\0\0"), "FNS1234");
/// ```
pub fn text_field(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).trim_matches(' ').to_string()
}
