//! Pump handles and the capability surface
//!
//! # Purpose
//! This module defines the per-unit drivers: state machines over the chain
//! which implement the diameter/flow-rate/target-volume setters, the
//! infuse/withdraw/stop commands, and the target-volume polling loop.
//!
//! # Dialect Differences
//! The firmware families differ in unit conventions, acknowledgement bytes,
//! and even command vocabulary:
//!
//!   - **Pump 11** is the reference Harvard dialect: microlitre volumes,
//!     terminal status symbols, `:` on a successful stop.
//!
//!   - **PHD2000** speaks the same protocol apart from taking target volumes
//!     in millilitres and acknowledging a stop with `*`.
//!
//!   - **Mighty Mini** shares nothing: two-letter opcodes without address or
//!     terminator, `OK` acknowledgements, no syringe, no direction.
//!
//! Rather than forcing a shared hierarchy onto protocols that share almost
//! nothing, every driver implements the one [`SyringePump`] capability
//! trait, whose methods default to reporting the operation as not
//! applicable. A driver only implements what its unit can actually do;
//! asking a Mighty Mini to withdraw fails without a byte going out on the
//! line.
//!
//! # Confirmed state
//! The three cached fields (diameter, flow rate, target volume) are only
//! ever updated after the unit's own read-back or echo matches what was
//! commanded. A mismatch leaves the prior value in place and surfaces an
//! error; the cache never silently diverges from confirmed device state.
//!
//! # Cancel Safety
//! None of the operations are cancel safe. Each one is a write followed by
//! one or more reads, and cancelling between the two leaves the next
//! command's reply misaligned with the stream.

use async_trait::async_trait;
use tokio::io::{ AsyncReadExt, AsyncWriteExt };
use tracing::{ error, info, warn };

use crate::{
    clean, format_diameter, format_field, truncate_field, PumpError,
    cmd::{ CmdDisplayFactory, CmdSet, HarvardDisplay, MightyMiniDisplay },
    executor::Chain,
    status::{ Reply, TerminalStatus },
};

/// The operations a syringe pump may support
///
/// Every method except `name` defaults to reporting the operation as not
/// applicable to the unit, without touching the line. Dialects override
/// exactly the set their protocol can express; `stop` in particular must be
/// overridden by every dialect because each family acknowledges it with a
/// different byte.
#[async_trait]
pub trait SyringePump<T>: Send
    where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
{
    /// Unit name used in events and errors
    fn name(&self) -> &str;

    /// Set the syringe diameter (millimetres)
    async fn set_diameter(&mut self, _chain: &mut Chain<T>, _diameter: f64) -> Result<(), PumpError>
    {
        Err(PumpError::Unsupported {
            pump: self.name().to_string(),
            operation: "setting a syringe diameter",
        })
    }

    /// Set the flow rate (microlitres per minute)
    async fn set_flowrate(&mut self, _chain: &mut Chain<T>, _flowrate: f64) -> Result<(), PumpError>
    {
        Err(PumpError::Unsupported {
            pump: self.name().to_string(),
            operation: "setting a flow rate",
        })
    }

    /// Set the target volume to infuse or withdraw (microlitres)
    async fn set_target_volume(&mut self, _chain: &mut Chain<T>, _volume: f64) -> Result<(), PumpError>
    {
        Err(PumpError::Unsupported {
            pump: self.name().to_string(),
            operation: "setting a target volume",
        })
    }

    /// Start infusing
    async fn infuse(&mut self, _chain: &mut Chain<T>) -> Result<(), PumpError>
    {
        Err(PumpError::Unsupported {
            pump: self.name().to_string(),
            operation: "infusing",
        })
    }

    /// Start withdrawing
    async fn withdraw(&mut self, _chain: &mut Chain<T>) -> Result<(), PumpError>
    {
        Err(PumpError::Unsupported {
            pump: self.name().to_string(),
            operation: "withdrawing",
        })
    }

    /// Halt the pump
    async fn stop(&mut self, _chain: &mut Chain<T>) -> Result<(), PumpError>
    {
        Err(PumpError::Unsupported {
            pump: self.name().to_string(),
            operation: "stopping",
        })
    }

    /// Block until the commanded target volume is reached
    async fn wait_until_target(&mut self, _chain: &mut Chain<T>) -> Result<(), PumpError>
    {
        Err(PumpError::Unsupported {
            pump: self.name().to_string(),
            operation: "waiting on a target volume",
        })
    }
}

/// Harvard Pump 11 on a pump chain
///
/// The reference Harvard dialect. Commands are `AAOPCODE[ARG]\r` where `AA`
/// is the unit's two-digit address; replies are CR/LF-prefixed fixed-length
/// buffers closed by a terminal status symbol.
#[derive(Debug)]
pub struct Pump11
{
    name: String,
    address: u8,
    addr_text: String,
    diameter: Option<f64>,
    flowrate: Option<String>,
    target_volume: Option<f64>,
}

impl Pump11
{
    /// Attach to the unit at `address`, checking that it answers as itself
    ///
    /// Queries model and firmware version. The reply is mostly noise, but
    /// its last three characters are `XXY` where `XX` echoes the address and
    /// `Y` is a terminal status symbol, which makes the query double as a
    /// check that a working pump sits at this address. On a wrong or missing
    /// echo the chain is closed before the error propagates, so the caller
    /// is not left holding an open line with nothing on it.
    pub async fn with<T>(chain: &mut Chain<T>, address: u8, name: &str) -> Result<Self, PumpError>
        where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
    {
        if address > 99 {
            return Err(PumpError::OutOfRange {
                pump: name.to_string(),
                what: "address",
                value: address.to_string(),
            });
        }

        let pump = Self {
            name: name.to_string(),
            address: address,
            addr_text: format!("{:02}", address),
            diameter: None,
            flowrate: None,
            target_volume: None,
        };

        let resp = match pump.exchange(chain, CmdSet::Version, 17, "version query").await {
            Ok(resp) => resp,
            Err(err) => {
                chain.close();
                return Err(err);
            }
        };

        if resp.address_echo() != Some(address) {
            chain.close();
            return Err(PumpError::AddressMismatch {
                pump: pump.name,
                address: address,
            });
        }

        info!(pump = %pump.name, address = %pump.addr_text, "pump attached");

        Ok(pump)
    }

    pub fn name(&self) -> &str
    {
        &self.name
    }

    pub fn address(&self) -> u8
    {
        self.address
    }

    /// Last diameter confirmed by the pump (millimetres)
    pub fn diameter(&self) -> Option<f64>
    {
        self.diameter
    }

    /// Last flow rate confirmed by the pump, as the firmware echoed it
    pub fn flowrate(&self) -> Option<&str>
    {
        self.flowrate.as_deref()
    }

    /// Last target volume confirmed by the pump (microlitres)
    pub fn target_volume(&self) -> Option<f64>
    {
        self.target_volume
    }

    /// One full command/response exchange on the shared line
    async fn exchange<T>(
        &self,
        chain: &mut Chain<T>,
        cmd: CmdSet,
        expected: usize,
        operation: &'static str,
    )
        -> Result<Reply, PumpError>
        where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
    {
        let frame = format!("{}{}\r", self.addr_text, HarvardDisplay::display_cmd(cmd));
        chain.transmit(frame.as_bytes()).await?;
        let resp = chain.receive(expected).await?;

        if resp.is_empty() {
            return Err(PumpError::NoResponse {
                pump: self.name.clone(),
                operation: operation,
            });
        }

        Ok(resp)
    }

    fn unexpected(&self, operation: &'static str, resp: Reply) -> PumpError
    {
        PumpError::UnexpectedStatus {
            pump: self.name.clone(),
            operation: operation,
            reply: resp.into_bytes(),
        }
    }
}

#[async_trait]
impl <T> SyringePump<T> for Pump11
    where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
{
    fn name(&self) -> &str
    {
        &self.name
    }

    /// Set the syringe diameter (millimetres)
    ///
    /// The Pump 11 accepts diameters of 0.1-35 mm and ignores precision past
    /// two decimal places; anything finer is truncated with a warning. The
    /// value is only cached after a confirmatory `DIA` query echoes it back.
    async fn set_diameter(&mut self, chain: &mut Chain<T>, diameter: f64) -> Result<(), PumpError>
    {
        if !(0.1..=35.0).contains(&diameter) {
            return Err(PumpError::OutOfRange {
                pump: self.name.clone(),
                what: "diameter",
                value: format!("{} mm", diameter),
            });
        }

        let (field, truncated) = format_diameter(diameter);
        if truncated {
            warn!(pump = %self.name, field = %field, "diameter truncated");
        }

        let resp = self.exchange(chain, CmdSet::SetDiameter(field.clone()), 5, "setting the diameter").await?;
        if resp.status().is_err() {
            return Err(self.unexpected("setting the diameter", resp));
        }

        let echo = self.exchange(chain, CmdSet::QueryDiameter, 15, "reading back the diameter").await?;
        let echoed = clean(&echo.window(3, 9));

        if echoed != field {
            error!(pump = %self.name, sent = %field, echoed = %echoed, "diameter read-back mismatch");
            return Err(PumpError::ReadbackMismatch {
                pump: self.name.clone(),
                what: "diameter",
                sent: field,
                echoed: echoed,
            });
        }

        self.diameter = Some(echoed.parse::<f64>().unwrap_or(diameter));
        info!(pump = %self.name, diameter = ?self.diameter, "diameter set");

        Ok(())
    }

    /// Set the flow rate (microlitres per minute)
    ///
    /// The commanded field has a maximum width of five characters, e.g.
    /// `XXXX.` or `X.XXX`; finer precision is truncated with a warning.
    /// Whether a rate is in range depends on the fitted syringe, so range
    /// checking is left to the pump, which answers `OOR` when it refuses.
    /// The value is only cached after a confirmatory `RAT` query echoes it.
    async fn set_flowrate(&mut self, chain: &mut Chain<T>, flowrate: f64) -> Result<(), PumpError>
    {
        let (field, truncated) = format_field(flowrate, 5);
        if truncated {
            warn!(pump = %self.name, field = %field, "flow rate truncated");
        }

        let resp = self.exchange(chain, CmdSet::SetFlowRate(field.clone()), 5, "setting the flow rate").await?;

        if resp.contains(b"OOR") {
            return Err(PumpError::OutOfRange {
                pump: self.name.clone(),
                what: "flow rate",
                value: format!("{} ul/min", field),
            });
        }

        if resp.status().is_err() {
            return Err(self.unexpected("setting the flow rate", resp));
        }

        let echo = self.exchange(chain, CmdSet::QueryFlowRate, 150, "reading back the flow rate").await?;
        let echoed = clean(&echo.window(2, 8));

        if echoed != field {
            error!(pump = %self.name, sent = %field, echoed = %echoed, "flow rate read-back mismatch");
            return Err(PumpError::ReadbackMismatch {
                pump: self.name.clone(),
                what: "flow rate",
                sent: field,
                echoed: echoed,
            });
        }

        self.flowrate = Some(echoed);
        info!(pump = %self.name, flowrate = ?self.flowrate, "flow rate set");

        Ok(())
    }

    /// Set the target volume to infuse or withdraw (microlitres)
    ///
    /// The protocol has no read-back query for the target, so success is a
    /// valid terminal symbol plus the unit's own address echoed in the
    /// reply.
    async fn set_target_volume(&mut self, chain: &mut Chain<T>, volume: f64) -> Result<(), PumpError>
    {
        let (field, truncated) = truncate_field(&volume.to_string(), 5);
        if truncated {
            warn!(pump = %self.name, field = %field, "target volume truncated");
        }

        let resp = self.exchange(chain, CmdSet::SetTargetVolume(field.clone()), 5, "setting the target volume").await?;
        if resp.status().is_err() {
            return Err(self.unexpected("setting the target volume", resp));
        }

        if resp.address_echo() != Some(self.address) {
            return Err(PumpError::AddressMismatch {
                pump: self.name.clone(),
                address: self.address,
            });
        }

        self.target_volume = Some(field.parse::<f64>().unwrap_or(volume));
        info!(pump = %self.name, target_volume = ?self.target_volume, "target volume set");

        Ok(())
    }

    /// Start infusing
    ///
    /// `RUN` starts the pump in whatever direction it last ran; there is no
    /// explicit go-forward command. A reverse status reply gets a `REV` and
    /// a re-read until the pump reports forward. Any other symbol ends the
    /// loop as fatal.
    async fn infuse(&mut self, chain: &mut Chain<T>) -> Result<(), PumpError>
    {
        let mut resp = self.exchange(chain, CmdSet::Run, 5, "infusing").await?;

        loop {
            match resp.status() {
                Ok(TerminalStatus::Forward) => break,
                Ok(TerminalStatus::Reverse) => {
                    resp = self.exchange(chain, CmdSet::Reverse, 5, "infusing").await?;
                }
                _ => return Err(self.unexpected("infusing", resp)),
            }
        }

        info!(pump = %self.name, "infusing");

        Ok(())
    }

    /// Start withdrawing
    ///
    /// Some firmware revisions only honor a direction reversal once the
    /// pump is running, so an idle reply gets a `RUN` before the next `REV`.
    /// Any symbol outside the documented three ends the loop as fatal.
    async fn withdraw(&mut self, chain: &mut Chain<T>) -> Result<(), PumpError>
    {
        let mut resp = self.exchange(chain, CmdSet::Reverse, 5, "withdrawing").await?;

        loop {
            match resp.status() {
                Ok(TerminalStatus::Reverse) => break,
                Ok(TerminalStatus::Idle) => {
                    resp = self.exchange(chain, CmdSet::Run, 5, "withdrawing").await?;
                }
                Ok(TerminalStatus::Forward) => {
                    resp = self.exchange(chain, CmdSet::Reverse, 5, "withdrawing").await?;
                }
                Err(_) => return Err(self.unexpected("withdrawing", resp)),
            }
        }

        info!(pump = %self.name, "withdrawing");

        Ok(())
    }

    /// Halt the pump
    ///
    /// The Pump 11 acknowledges a stop with an idle status symbol.
    async fn stop(&mut self, chain: &mut Chain<T>) -> Result<(), PumpError>
    {
        let resp = self.exchange(chain, CmdSet::Stop, 5, "stopping").await?;

        match resp.status() {
            Ok(TerminalStatus::Idle) => {
                info!(pump = %self.name, "stopped");
                Ok(())
            }
            _ => Err(self.unexpected("stopping", resp)),
        }
    }

    /// Block until the commanded target volume is reached
    ///
    /// The protocol has no completion interrupt, so the driver samples the
    /// volume-remaining query until it stabilizes: an idle status after at
    /// least one running sample counts as done, and so do two consecutive
    /// byte-identical replies (the pump stopped advancing between samples).
    /// A pump that stalls between two samples for any other reason is
    /// indistinguishable from a finished one on the wire; that ambiguity
    /// belongs to the protocol, not to this driver. An idle status on the
    /// very first sample means nothing was running to begin with, which is
    /// reported rather than waited on.
    ///
    /// Each poll is bounded by the chain's read timeout, but the wait as a
    /// whole has no deadline; bound it from the caller if one is needed.
    async fn wait_until_target(&mut self, chain: &mut Chain<T>) -> Result<(), PumpError>
    {
        info!(pump = %self.name, "waiting until target volume is reached");

        let mut sampled_running = false;

        loop {
            let first = self.exchange(chain, CmdSet::QueryVolume, 15, "querying the volume").await?;

            if first.contains(b":") {
                if !sampled_running {
                    return Err(PumpError::NotRunning { pump: self.name.clone() });
                }

                info!(pump = %self.name, "target volume reached, stopped");
                return Ok(());
            }

            let second = self.exchange(chain, CmdSet::QueryVolume, 15, "querying the volume").await?;

            if first.as_bytes() == second.as_bytes() {
                info!(pump = %self.name, "target volume reached, stopped");
                return Ok(());
            }

            sampled_running = true;
        }
    }
}

/// Harvard PHD2000 on a pump chain
///
/// Speaks the Pump 11 protocol apart from two quirks: the stop
/// acknowledgement is `*` rather than a terminal status symbol, and target
/// volumes travel in millilitres. Callers still work in microlitres; the
/// conversion never leaves the driver.
pub struct Phd2000
{
    delegate: Pump11,
}

impl Phd2000
{
    /// Attach to the unit at `address`, checking that it answers as itself
    pub async fn with<T>(chain: &mut Chain<T>, address: u8, name: &str) -> Result<Self, PumpError>
        where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
    {
        Ok(Self {
            delegate: Pump11::with(chain, address, name).await?,
        })
    }

    pub fn name(&self) -> &str
    {
        self.delegate.name()
    }

    pub fn address(&self) -> u8
    {
        self.delegate.address()
    }

    /// Last diameter confirmed by the pump (millimetres)
    pub fn diameter(&self) -> Option<f64>
    {
        self.delegate.diameter()
    }

    /// Last flow rate confirmed by the pump, as the firmware echoed it
    pub fn flowrate(&self) -> Option<&str>
    {
        self.delegate.flowrate()
    }

    /// Last target volume confirmed by the pump (microlitres)
    pub fn target_volume(&self) -> Option<f64>
    {
        self.delegate.target_volume()
    }
}

#[async_trait]
impl <T> SyringePump<T> for Phd2000
    where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
{
    fn name(&self) -> &str
    {
        self.delegate.name()
    }

    async fn set_diameter(&mut self, chain: &mut Chain<T>, diameter: f64) -> Result<(), PumpError>
    {
        self.delegate.set_diameter(chain, diameter).await
    }

    async fn set_flowrate(&mut self, chain: &mut Chain<T>, flowrate: f64) -> Result<(), PumpError>
    {
        self.delegate.set_flowrate(chain, flowrate).await
    }

    /// Set the target volume to infuse or withdraw (microlitres)
    ///
    /// The PHD2000 expects millilitres on the wire where the Pump 11 takes
    /// microlitres, so the field is scaled down before formatting and the
    /// confirmed value scaled back up. Callers never see the unit switch.
    async fn set_target_volume(&mut self, chain: &mut Chain<T>, volume: f64) -> Result<(), PumpError>
    {
        let millilitres = volume / 1000.0;
        let (field, truncated) = truncate_field(&millilitres.to_string(), 5);
        if truncated {
            warn!(pump = %self.delegate.name, field = %field, "target volume truncated");
        }

        let resp = self.delegate.exchange(chain, CmdSet::SetTargetVolume(field.clone()), 5, "setting the target volume").await?;
        if resp.status().is_err() {
            return Err(self.delegate.unexpected("setting the target volume", resp));
        }

        if resp.address_echo() != Some(self.delegate.address) {
            return Err(PumpError::AddressMismatch {
                pump: self.delegate.name.clone(),
                address: self.delegate.address,
            });
        }

        self.delegate.target_volume = Some(field.parse::<f64>().unwrap_or(millilitres) * 1000.0);
        info!(pump = %self.delegate.name, target_volume = ?self.delegate.target_volume, "target volume set");

        Ok(())
    }

    async fn infuse(&mut self, chain: &mut Chain<T>) -> Result<(), PumpError>
    {
        self.delegate.infuse(chain).await
    }

    async fn withdraw(&mut self, chain: &mut Chain<T>) -> Result<(), PumpError>
    {
        self.delegate.withdraw(chain).await
    }

    /// Halt the pump
    ///
    /// The PHD2000 acknowledges a stop with `*` instead of an idle status
    /// symbol.
    async fn stop(&mut self, chain: &mut Chain<T>) -> Result<(), PumpError>
    {
        let resp = self.delegate.exchange(chain, CmdSet::Stop, 5, "stopping").await?;

        if resp.final_byte() == Some(b'*') {
            info!(pump = %self.delegate.name, "stopped");
            Ok(())
        }
        else {
            Err(self.delegate.unexpected("stopping", resp))
        }
    }

    async fn wait_until_target(&mut self, chain: &mut Chain<T>) -> Result<(), PumpError>
    {
        self.delegate.wait_until_target(chain).await
    }
}

/// SSI Mighty Mini on its own line
///
/// Unrelated command vocabulary: two-letter opcodes, no address prefix, no
/// carriage return, and a two-byte `OK` acknowledgement instead of terminal
/// status symbols. The unit has no syringe, so diameter, direction, and
/// target volume mean nothing to it; those operations report as not
/// applicable without touching the line.
pub struct MightyMini
{
    name: String,
    flowrate: Option<String>,
}

impl MightyMini
{
    pub fn with(name: &str) -> Self
    {
        Self {
            name: name.to_string(),
            flowrate: None,
        }
    }

    pub fn name(&self) -> &str
    {
        &self.name
    }

    /// Last flow rate confirmed by the pump (microlitres per minute)
    pub fn flowrate(&self) -> Option<&str>
    {
        self.flowrate.as_deref()
    }

    async fn exchange<T>(
        &self,
        chain: &mut Chain<T>,
        cmd: CmdSet,
        expected: usize,
        operation: &'static str,
    )
        -> Result<Reply, PumpError>
        where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
    {
        let frame = format!("{}", MightyMiniDisplay::display_cmd(cmd));
        chain.transmit(frame.as_bytes()).await?;
        let resp = chain.receive(expected).await?;

        if resp.is_empty() {
            return Err(PumpError::NoResponse {
                pump: self.name.clone(),
                operation: operation,
            });
        }

        Ok(resp)
    }

    fn unexpected(&self, operation: &'static str, resp: Reply) -> PumpError
    {
        PumpError::UnexpectedStatus {
            pump: self.name.clone(),
            operation: operation,
            reply: resp.into_bytes(),
        }
    }
}

#[async_trait]
impl <T> SyringePump<T> for MightyMini
    where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
{
    fn name(&self) -> &str
    {
        &self.name
    }

    /// Set the flow rate (microlitres per minute)
    ///
    /// The rate travels as a four-digit integer field, clamped to 0-9999
    /// with a warning. Confirmation goes through the separate `CC` query,
    /// whose reply encodes the stored rate in millilitres per minute;
    /// scaling by 1000 recovers the integer for the compare.
    async fn set_flowrate(&mut self, chain: &mut Chain<T>, flowrate: f64) -> Result<(), PumpError>
    {
        let mut rate = flowrate as u32;
        if rate > 9999 {
            rate = 9999;
            warn!(pump = %self.name, rate = rate, "flow rate clamped");
        }

        let resp = self.exchange(chain, CmdSet::SetFlowRate(format!("{:04}", rate)), 3, "setting the flow rate").await?;
        if !resp.acknowledged() {
            return Err(self.unexpected("setting the flow rate", resp));
        }

        let echo = self.exchange(chain, CmdSet::QueryFlowRate, 11, "reading back the flow rate").await?;
        let echoed = match echo.window(5, 10).trim().parse::<f64>() {
            Ok(value) => (value * 1000.0).round() as u32,
            Err(_) => return Err(self.unexpected("reading back the flow rate", echo)),
        };

        if echoed != rate {
            error!(pump = %self.name, sent = rate, echoed = echoed, "flow rate read-back mismatch");
            return Err(PumpError::ReadbackMismatch {
                pump: self.name.clone(),
                what: "flow rate",
                sent: rate.to_string(),
                echoed: echoed.to_string(),
            });
        }

        self.flowrate = Some(rate.to_string());
        info!(pump = %self.name, flowrate = ?self.flowrate, "flow rate set");

        Ok(())
    }

    /// Start infusing
    async fn infuse(&mut self, chain: &mut Chain<T>) -> Result<(), PumpError>
    {
        let resp = self.exchange(chain, CmdSet::Run, 3, "infusing").await?;

        if resp.acknowledged() {
            info!(pump = %self.name, "infusing");
            Ok(())
        }
        else {
            Err(self.unexpected("infusing", resp))
        }
    }

    /// Halt the pump
    async fn stop(&mut self, chain: &mut Chain<T>) -> Result<(), PumpError>
    {
        let resp = self.exchange(chain, CmdSet::Stop, 3, "stopping").await?;

        if resp.acknowledged() {
            info!(pump = %self.name, "stopped");
            Ok(())
        }
        else {
            Err(self.unexpected("stopping", resp))
        }
    }
}
