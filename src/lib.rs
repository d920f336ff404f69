//! **A**synchronous-Rust **R**emote **C**ontrol for **S**yringe pumps
//!
//! Drives Harvard Apparatus syringe pumps (and one unrelated SSI unit)
//! daisy-chained on a single serial line. Each unit is addressed
//! individually and keeps its own notion of syringe diameter, flow rate,
//! and target volume; this crate does the fixed-width command formatting,
//! terminal-status decoding, direction-forcing retries, and the
//! sample-until-stable polling the protocol requires to detect that a
//! target volume has been reached.

use std::{ fmt, io };

pub mod status;

mod cmd;
mod devices;
mod executor;

pub use devices::{ MightyMini, Phd2000, Pump11, SyringePump };
pub use executor::{ Chain, DEFAULT_READ_TIMEOUT };
pub use status::TerminalStatus;

/// Return command text without useless bytes
///
/// Strips trailing zeros after a decimal point, then leading zeros and
/// spaces, then trailing spaces and a bare trailing decimal point. The pumps
/// echo stored values back padded and zero-filled, so the same pass is
/// applied to outgoing field text and to echoed read-back windows, letting
/// the two sides be compared as plain strings.
///
/// A bare `"0"` cleans down to the empty string. The echo of a zero
/// magnitude does too, so equality still holds when the magnitudes match.
pub fn clean(text: &str) -> String
{
    let mut text = text;

    if text.contains('.') {
        text = text.trim_end_matches('0');
    }

    text = text.trim_start_matches(|c| c == '0' || c == ' ');
    text.trim_end_matches(|c| c == ' ' || c == '.').to_string()
}

/// Cut rendered text down to a fixed command field width
///
/// Returns the text and whether anything was cut. A cut that would leave the
/// decimal separator as the final character drops the separator as well; the
/// firmware does not accept a dangling point.
pub fn truncate_field(text: &str, width: usize) -> (String, bool)
{
    if text.len() <= width {
        return (text.to_string(), false);
    }

    let mut cut = width;
    if text.as_bytes()[cut - 1] == b'.' {
        cut -= 1;
    }

    (text[..cut].to_string(), true)
}

/// Render a value into a command field of at most `width` characters
///
/// The flow-rate field is five characters, e.g. `XXXX.` or `X.XXX`; finer
/// precision is cut off. The returned flag reports that a cut happened so
/// the caller can warn without blocking the command.
pub fn format_field(value: f64, width: usize) -> (String, bool)
{
    let (text, truncated) = truncate_field(&value.to_string(), width);
    (clean(&text), truncated)
}

/// Render a syringe diameter into the pump's five-character field
///
/// The firmware only honors two decimal places, so an over-width render
/// keeps `dot + 3` characters capped at the field width. That window is what
/// makes a one-digit whole part keep four characters and a two-digit whole
/// part keep five. A render with no decimal point at all falls back to a
/// plain cut at the field width.
pub fn format_diameter(value: f64) -> (String, bool)
{
    const WIDTH: usize = 5;
    let text = value.to_string();

    if text.len() <= WIDTH {
        return (clean(&text), false);
    }

    let mut cut = match text.find('.') {
        Some(dot) => WIDTH.min(dot + 3),
        None => WIDTH,
    };

    if text.as_bytes()[cut - 1] == b'.' {
        cut -= 1;
    }

    (clean(&text[..cut]), true)
}

/// Any failure while talking to a pump
#[derive(Debug)]
pub enum PumpError
{
    /// A value was refused before any bytes went out on the line
    OutOfRange
    {
        pump: String,
        what: &'static str,
        value: String,
    },
    /// The unit sent nothing back within the read timeout
    ///
    /// Always fatal to the operation that asked; a silent unit is never
    /// retried.
    NoResponse
    {
        pump: String,
        operation: &'static str,
    },
    /// The reply closed with no symbol documented for the operation
    ///
    /// Also terminates the direction-correction loops in infuse and
    /// withdraw, which only ever retry on the documented symbols.
    UnexpectedStatus
    {
        pump: String,
        operation: &'static str,
        reply: Vec<u8>,
    },
    /// A confirmatory read-back disagreed with the value sent
    ///
    /// The cached field keeps its last-confirmed value; it is never set to a
    /// value the unit did not acknowledge storing.
    ReadbackMismatch
    {
        pump: String,
        what: &'static str,
        sent: String,
        echoed: String,
    },
    /// A reply's address echo was not the unit's own
    AddressMismatch
    {
        pump: String,
        address: u8,
    },
    /// A target-volume wait was started while the unit reported idle
    NotRunning
    {
        pump: String,
    },
    /// The unit's dialect has no way to express the operation
    ///
    /// Nothing was written to the line.
    Unsupported
    {
        pump: String,
        operation: &'static str,
    },
    /// Transport-level failure
    Io(io::Error),
    /// Serial port construction failure
    Serial(tokio_serial::Error),
}

impl fmt::Display for PumpError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::OutOfRange { pump, what, value } =>
                write!(f, "{}: {} {} is out of range", pump, what, value),
            Self::NoResponse { pump, operation } =>
                write!(f, "{}: no response to {}", pump, operation),
            Self::UnexpectedStatus { pump, operation, reply } =>
                write!(f, "{}: unknown response to {} ({:?})", pump, operation, reply),
            Self::ReadbackMismatch { pump, what, sent, echoed } =>
                write!(f, "{}: set {} ({}) does not match {} returned by pump ({})", pump, what, sent, what, echoed),
            Self::AddressMismatch { pump, address } =>
                write!(f, "{}: response did not come from address {:02}", pump, address),
            Self::NotRunning { pump } =>
                write!(f, "{}: not infusing or withdrawing - infuse or withdraw first", pump),
            Self::Unsupported { pump, operation } =>
                write!(f, "{}: {} is not applicable to this pump", pump, operation),
            Self::Io(err) => write!(f, "{}", err),
            Self::Serial(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for PumpError {}

impl From<io::Error> for PumpError
{
    fn from(err: io::Error) -> Self
    {
        Self::Io(err)
    }
}

impl From<tokio_serial::Error> for PumpError
{
    fn from(err: tokio_serial::Error) -> Self
    {
        Self::Serial(err)
    }
}

#[cfg(test)]
mod tests {
    use super::{ clean, format_diameter, format_field, truncate_field };
    use super::cmd::{ CmdDisplayFactory, CmdSet, HarvardDisplay, MightyMiniDisplay };

    #[test]
    fn clean_strips_padding_and_zeros()
    {
        assert_eq!(clean("16.200"), "16.2");
        assert_eq!(clean("  16.2  "), "16.2");
        assert_eq!(clean("016.00"), "16");
        assert_eq!(clean("500.00"), "500");
    }

    #[test]
    fn clean_drops_bare_point()
    {
        assert_eq!(clean("16."), "16");
        assert_eq!(clean("1234."), "1234");
    }

    #[test]
    fn clean_keeps_subnormal_fraction()
    {
        assert_eq!(clean("0.15"), ".15");
    }

    #[test]
    fn clean_of_zero_is_empty()
    {
        assert_eq!(clean("0"), "");
        assert_eq!(clean("0.000"), "");
    }

    #[test]
    fn clean_is_idempotent_on_formatted_fields()
    {
        for value in &[0.1, 0.15, 3.0, 16.0, 30.2222222, 34.99] {
            let (text, _) = format_diameter(*value);
            assert_eq!(clean(&text), text);
        }
    }

    #[test]
    fn format_whole_drops_point()
    {
        assert_eq!(format_field(3.0, 5), ("3".to_string(), false));
    }

    #[test]
    fn format_field_truncates_to_width()
    {
        assert_eq!(format_field(30.2222222, 5), ("30.22".to_string(), true));
    }

    #[test]
    fn truncate_field_drops_dangling_point()
    {
        assert_eq!(truncate_field("1234.5", 5), ("1234".to_string(), true));
    }

    #[test]
    fn format_diameter_two_digit_whole()
    {
        assert_eq!(format_diameter(30.2222222), ("30.22".to_string(), true));
    }

    #[test]
    fn format_diameter_one_digit_whole()
    {
        assert_eq!(format_diameter(3.222222), ("3.22".to_string(), true));
    }

    #[test]
    fn format_diameter_three_digit_whole()
    {
        assert_eq!(format_diameter(123.456), ("123.4".to_string(), true));
    }

    #[test]
    fn format_diameter_dangling_point()
    {
        assert_eq!(format_diameter(1234.5), ("1234".to_string(), true));
    }

    #[test]
    fn format_diameter_in_range_untouched()
    {
        assert_eq!(format_diameter(16.0), ("16".to_string(), false));
        assert_eq!(format_diameter(0.15), (".15".to_string(), false));
    }

    #[test]
    fn serialize_harvard()
    {
        assert_eq!(&format!("{}", HarvardDisplay::display_cmd(CmdSet::Version)), "VER");
        assert_eq!(&format!("{}", HarvardDisplay::display_cmd(CmdSet::SetDiameter("16".to_string()))), "MMD16");
        assert_eq!(&format!("{}", HarvardDisplay::display_cmd(CmdSet::QueryDiameter)), "DIA");
        assert_eq!(&format!("{}", HarvardDisplay::display_cmd(CmdSet::SetFlowRate("30.22".to_string()))), "ULM30.22");
        assert_eq!(&format!("{}", HarvardDisplay::display_cmd(CmdSet::QueryFlowRate)), "RAT");
        assert_eq!(&format!("{}", HarvardDisplay::display_cmd(CmdSet::SetTargetVolume("100".to_string()))), "MLT100");
        assert_eq!(&format!("{}", HarvardDisplay::display_cmd(CmdSet::QueryVolume)), "VOL");
        assert_eq!(&format!("{}", HarvardDisplay::display_cmd(CmdSet::Run)), "RUN");
        assert_eq!(&format!("{}", HarvardDisplay::display_cmd(CmdSet::Reverse)), "REV");
        assert_eq!(&format!("{}", HarvardDisplay::display_cmd(CmdSet::Stop)), "STP");
    }

    #[test]
    fn serialize_mighty_mini()
    {
        assert_eq!(&format!("{}", MightyMiniDisplay::display_cmd(CmdSet::SetFlowRate("0100".to_string()))), "FM0100");
        assert_eq!(&format!("{}", MightyMiniDisplay::display_cmd(CmdSet::QueryFlowRate)), "CC");
        assert_eq!(&format!("{}", MightyMiniDisplay::display_cmd(CmdSet::Run)), "RU");
        assert_eq!(&format!("{}", MightyMiniDisplay::display_cmd(CmdSet::Stop)), "ST");
    }

    #[test]
    #[should_panic]
    fn mighty_mini_reverse_panics()
    {
        format!("{}", MightyMiniDisplay::display_cmd(CmdSet::Reverse));
    }
}
