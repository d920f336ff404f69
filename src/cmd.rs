//! Pump command definition and per-dialect serialization

use std::fmt;

/// The command vocabulary shared by the drivers
///
/// Set-commands carry their argument as pre-formatted field text rather than
/// a number: the driver needs the exact bytes it sent when it compares a
/// confirmatory read-back, so the field is rendered once (in the crate root
/// formatter) and threaded through here untouched.
#[derive(Clone)]
pub enum CmdSet
{
    /// Query model and firmware version
    ///
    /// Command: `VER`
    Version,
    /// Set the syringe diameter
    ///
    /// Command: `MMD<field>`
    SetDiameter(String),
    /// Read back the stored syringe diameter
    ///
    /// Command: `DIA`
    QueryDiameter,
    /// Set the flow rate
    ///
    /// Command: `ULM<field>` (Harvard), `FM<field>` (Mighty Mini)
    SetFlowRate(String),
    /// Read back the stored flow rate
    ///
    /// Command: `RAT` (Harvard), `CC` (Mighty Mini)
    QueryFlowRate,
    /// Set the target volume to infuse or withdraw
    ///
    /// Command: `MLT<field>`
    SetTargetVolume(String),
    /// Query the volume still to be displaced
    ///
    /// Command: `VOL`
    QueryVolume,
    /// Start the pump in its current direction
    ///
    /// Command: `RUN` (Harvard), `RU` (Mighty Mini)
    Run,
    /// Reverse the pumping direction
    ///
    /// Command: `REV`
    Reverse,
    /// Halt the pump
    ///
    /// Command: `STP` (Harvard), `ST` (Mighty Mini)
    Stop,
}

/// Harvard-family serialization: three-letter opcodes, argument appended
/// with no separator
///
/// The address prefix and the CR terminator belong to the frame, not the
/// command, and are added by the driver when it writes to the chain.
pub struct HarvardDisplay
{
    cmd: CmdSet,
}

impl fmt::Display for HarvardDisplay
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match &self.cmd {
            CmdSet::Version => write!(f, "VER"),
            CmdSet::SetDiameter(field) => write!(f, "MMD{}", field),
            CmdSet::QueryDiameter => write!(f, "DIA"),
            CmdSet::SetFlowRate(field) => write!(f, "ULM{}", field),
            CmdSet::QueryFlowRate => write!(f, "RAT"),
            CmdSet::SetTargetVolume(field) => write!(f, "MLT{}", field),
            CmdSet::QueryVolume => write!(f, "VOL"),
            CmdSet::Run => write!(f, "RUN"),
            CmdSet::Reverse => write!(f, "REV"),
            CmdSet::Stop => write!(f, "STP"),
        }
    }
}

/// Mighty Mini serialization: two-letter opcodes, no address, no terminator
///
/// The unit has no syringe and no direction concept, so most of the shared
/// vocabulary has no encoding here. The drivers refuse those operations
/// before serialization is ever reached.
pub struct MightyMiniDisplay
{
    cmd: CmdSet,
}

impl fmt::Display for MightyMiniDisplay
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match &self.cmd {
            CmdSet::SetFlowRate(field) => write!(f, "FM{}", field),
            CmdSet::QueryFlowRate => write!(f, "CC"),
            CmdSet::Run => write!(f, "RU"),
            CmdSet::Stop => write!(f, "ST"),
            _ => panic!("command has no encoding in the Mighty Mini vocabulary"),
        }
    }
}

pub trait CmdDisplayFactory: fmt::Display
{
    fn display_cmd(cmd: CmdSet) -> Self;
}

impl CmdDisplayFactory for HarvardDisplay
{
    fn display_cmd(cmd: CmdSet) -> Self
    {
        Self { cmd: cmd }
    }
}

impl CmdDisplayFactory for MightyMiniDisplay
{
    fn display_cmd(cmd: CmdSet) -> Self
    {
        Self { cmd: cmd }
    }
}
