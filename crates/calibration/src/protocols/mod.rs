// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Calibration protocols.
//!
//! Each protocol contributes a step registry to the session engine and
//! declares which device directories it can calibrate. The CLI and the unit
//! API both discover protocols through [`protocol_registry`].

pub mod od_fusion;
pub mod od_reference;
pub mod od_standards;
pub mod pump_duration;
pub mod stirring_dc;

use crate::session::{CalibrationSession, SessionError, StepRegistry};
use pio_core::clock::Clock;

/// A named, device-scoped calibration procedure.
pub trait CalibrationProtocol: Send + Sync {
    fn protocol_name(&self) -> &'static str;
    fn title(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn supported_devices(&self) -> &'static [&'static str];
    fn registry(&self) -> StepRegistry;

    fn initial_step(&self) -> &'static str {
        "intro"
    }

    fn start_session(
        &self,
        target_device: &str,
        clock: &dyn Clock,
    ) -> Result<CalibrationSession, SessionError> {
        if !self.supported_devices().contains(&target_device) {
            return Err(SessionError::Input(format!(
                "protocol {:?} does not calibrate device {:?}",
                self.protocol_name(),
                target_device
            )));
        }
        Ok(CalibrationSession::start(
            self.protocol_name(),
            target_device,
            self.initial_step(),
            clock,
        ))
    }
}

/// Every protocol this build ships.
pub fn protocol_registry() -> Vec<Box<dyn CalibrationProtocol>> {
    vec![
        Box::new(pump_duration::DurationBasedPumpProtocol),
        Box::new(od_standards::StandardsOdProtocol),
        Box::new(od_reference::OdReferenceStandardProtocol),
        Box::new(stirring_dc::DcBasedStirringProtocol),
        Box::new(od_fusion::FusionStandardsProtocol),
        Box::new(od_fusion::FusionOffsetProtocol),
    ]
}

/// Find a protocol by name that supports the given device.
pub fn find_protocol(
    protocol_name: &str,
    target_device: &str,
) -> Option<Box<dyn CalibrationProtocol>> {
    protocol_registry()
        .into_iter()
        .find(|p| p.protocol_name() == protocol_name && p.supported_devices().contains(&target_device))
}

/// Default calibration name: `<device>-<YYYY-MM-DD_HH-MM>`.
pub fn default_calibration_name(device: &str, clock: &dyn Clock) -> String {
    format!(
        "{device}-{}",
        clock.now_utc().format("%Y-%m-%d_%H-%M")
    )
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
