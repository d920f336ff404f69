//! Response classification
//!
//! The pumps have no framing worth the name. A reply is a fixed number of
//! bytes whose only reliably meaningful content is the final character once
//! the CR/LF prefix and any stray trailing CR are stripped - the terminal
//! status symbol - plus, for selected commands, a numeric payload at a fixed
//! byte offset. Everything here works on the raw buffer and leaves deciding
//! what a symbol *means* for the current operation to the drivers.

use std::fmt;

/// Terminal status symbol closing every Harvard-family reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus
{
    /// `:` - stopped
    Idle,
    /// `>` - running forwards (infusing)
    Forward,
    /// `<` - running backwards (withdrawing)
    Reverse,
}

#[derive(Debug)]
pub struct ParseStatusErr {}

impl fmt::Display for ParseStatusErr
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "Unrecognized status symbol. Acceptable symbols are [':', '>', '<']")
    }
}

impl std::error::Error for ParseStatusErr {}

impl TerminalStatus
{
    pub fn from_byte(byte: u8) -> Result<Self, ParseStatusErr>
    {
        match byte {
            b':' => Ok(Self::Idle),
            b'>' => Ok(Self::Forward),
            b'<' => Ok(Self::Reverse),
            _ => Err(ParseStatusErr {}),
        }
    }
}

/// One reply buffer as it came off the line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply
{
    bytes: Vec<u8>,
}

impl Reply
{
    pub fn new(bytes: Vec<u8>) -> Self
    {
        Self { bytes: bytes }
    }

    /// An empty reply means the unit never answered within the read timeout
    pub fn is_empty(&self) -> bool
    {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8]
    {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8>
    {
        self.bytes
    }

    /// Reply bytes with the CR/LF framing stripped off the tail
    fn trimmed(&self) -> &[u8]
    {
        let mut end = self.bytes.len();

        while end > 0 && (self.bytes[end - 1] == b'\r' || self.bytes[end - 1] == b'\n') {
            end -= 1;
        }

        &self.bytes[..end]
    }

    /// Final character of the reply once CR/LF framing is stripped
    ///
    /// This is where dialects park their acknowledgement bytes that are not
    /// terminal status symbols, such as the PHD2000's `*` stop reply.
    pub fn final_byte(&self) -> Option<u8>
    {
        self.trimmed().last().copied()
    }

    /// Classify the final character as a terminal status symbol
    pub fn status(&self) -> Result<TerminalStatus, ParseStatusErr>
    {
        match self.final_byte() {
            Some(byte) => TerminalStatus::from_byte(byte),
            None => Err(ParseStatusErr {}),
        }
    }

    /// Scan the whole buffer for a byte pattern
    ///
    /// Used for the `OOR` out-of-range report and for spotting an idle
    /// symbol anywhere in a volume query reply.
    pub fn contains(&self, needle: &[u8]) -> bool
    {
        self.bytes.windows(needle.len()).any(|window| window == needle)
    }

    /// Lossy text of a fixed-offset payload window
    ///
    /// Returns an empty string when the reply is shorter than the window;
    /// the caller's cleaned comparison then fails the same way a garbled
    /// echo does.
    pub fn window(&self, start: usize, end: usize) -> String
    {
        if self.bytes.len() < end {
            return String::new();
        }

        String::from_utf8_lossy(&self.bytes[start..end]).into_owned()
    }

    /// Address digits echoed immediately before the status symbol
    ///
    /// The PHD2000 omits the zero padding and appends a stray CR where the
    /// Pump 11 echoes `XX`, so this takes the trailing digit run and parses
    /// it numerically rather than comparing text.
    pub fn address_echo(&self) -> Option<u8>
    {
        let trimmed = self.trimmed();

        if trimmed.is_empty() {
            return None;
        }

        let digits = &trimmed[..trimmed.len() - 1];
        let mut start = digits.len();

        while start > 0 && digits[start - 1].is_ascii_digit() {
            start -= 1;
        }

        if start == digits.len() {
            return None;
        }

        std::str::from_utf8(&digits[start..]).ok()?.parse::<u8>().ok()
    }

    /// Binary-status dialect acknowledgement: replies lead with `OK`
    pub fn acknowledged(&self) -> bool
    {
        self.bytes.starts_with(b"OK")
    }
}

#[cfg(test)]
mod tests {
    use super::{ Reply, TerminalStatus };

    #[test]
    fn status_ignores_trailing_cr()
    {
        let reply = Reply::new(b"\r\n00:\r".to_vec());
        assert_eq!(reply.status().unwrap(), TerminalStatus::Idle);
    }

    #[test]
    fn status_rejects_unknown_symbol()
    {
        let reply = Reply::new(b"\r\n00?".to_vec());
        assert!(reply.status().is_err());
    }

    #[test]
    fn address_echo_reads_trailing_digits()
    {
        let reply = Reply::new(b"\r\nPUMP 11 2.0 03:".to_vec());
        assert_eq!(reply.address_echo(), Some(3));
    }

    #[test]
    fn address_echo_tolerates_missing_padding()
    {
        let reply = Reply::new(b"\n3:\r".to_vec());
        assert_eq!(reply.address_echo(), Some(3));
    }

    #[test]
    fn address_echo_absent_without_digits()
    {
        let reply = Reply::new(b"\r\n>".to_vec());
        assert_eq!(reply.address_echo(), None);
    }

    #[test]
    fn window_short_reply_is_empty()
    {
        let reply = Reply::new(b"\r\n:".to_vec());
        assert_eq!(reply.window(3, 9), "");
    }

    #[test]
    fn acknowledged_checks_prefix()
    {
        assert!(Reply::new(b"OK\r".to_vec()).acknowledged());
        assert!(!Reply::new(b"NG\r".to_vec()).acknowledged());
        assert!(!Reply::new(Vec::new()).acknowledged());
    }
}
