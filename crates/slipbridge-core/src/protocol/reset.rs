//! Reset sequencing over the modem control lines
//!
//! On the usual auto-reset circuit DTR drives the boot-select pin and RTS the
//! reset/enable pin. The step order and delays below are a hardware contract:
//! reordering them or shortening a delay can leave the target in the wrong
//! mode. Sequences never retry; the first failed assignment aborts the run.

use std::time::Duration;

use tracing::{debug, info};

use super::link::Link;
use super::stream::Signal;
use super::ProtocolError;

/// One step of a reset sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStep {
    /// Drive a control line to a level
    Set(Signal, bool),
    /// Hold the current levels
    Wait(Duration),
}

const fn wait_ms(ms: u64) -> ResetStep {
    ResetStep::Wait(Duration::from_millis(ms))
}

/// Hold the target in reset with boot-select asserted, then release it into
/// the ROM bootloader.
pub const ENTER_PROGRAMMING_MODE: [ResetStep; 7] = [
    ResetStep::Set(Signal::DataTerminalReady, false),
    ResetStep::Set(Signal::RequestToSend, true),
    wait_ms(100),
    ResetStep::Set(Signal::DataTerminalReady, true),
    ResetStep::Set(Signal::RequestToSend, false),
    wait_ms(50),
    ResetStep::Set(Signal::DataTerminalReady, false),
];

/// Pulse reset with boot-select released so the application starts.
pub const RESET_TO_RUN: [ResetStep; 4] = [
    ResetStep::Set(Signal::RequestToSend, true),
    wait_ms(100),
    ResetStep::Set(Signal::RequestToSend, false),
    wait_ms(50),
];

/// Execute `steps` in order against the link's control lines.
pub async fn run_sequence(link: &mut Link, steps: &[ResetStep]) -> Result<(), ProtocolError> {
    for step in steps {
        match *step {
            ResetStep::Set(signal, level) => {
                debug!(%signal, level, "assign control line");
                link.set_signal(signal, level).await?;
            }
            ResetStep::Wait(delay) => tokio::time::sleep(delay).await,
        }
    }
    Ok(())
}

/// Reset the target into its ROM bootloader
pub async fn enter_programming_mode(link: &mut Link) -> Result<(), ProtocolError> {
    info!("resetting into bootloader");
    run_sequence(link, &ENTER_PROGRAMMING_MODE).await
}

/// Hard-reset the target into its application
pub async fn reset_to_run(link: &mut Link) -> Result<(), ProtocolError> {
    info!("hard resetting");
    run_sequence(link, &RESET_TO_RUN).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_programming_mode_order() {
        use super::ResetStep::*;
        use super::Signal::*;
        assert_eq!(
            ENTER_PROGRAMMING_MODE,
            [
                Set(DataTerminalReady, false),
                Set(RequestToSend, true),
                Wait(Duration::from_millis(100)),
                Set(DataTerminalReady, true),
                Set(RequestToSend, false),
                Wait(Duration::from_millis(50)),
                Set(DataTerminalReady, false),
            ]
        );
    }

    #[test]
    fn test_reset_to_run_order() {
        let total: Duration = RESET_TO_RUN
            .iter()
            .filter_map(|step| match step {
                ResetStep::Wait(d) => Some(*d),
                ResetStep::Set(..) => None,
            })
            .sum();
        assert_eq!(total, Duration::from_millis(150));
        assert_eq!(RESET_TO_RUN[0], ResetStep::Set(Signal::RequestToSend, true));
        assert_eq!(RESET_TO_RUN[2], ResetStep::Set(Signal::RequestToSend, false));
    }
}
