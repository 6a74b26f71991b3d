use crate::drivers::{Daq, DaqError, DigitalPort, PortDirection};

/// Relay outputs on one digital port of a board.
///
/// Writes are fire-and-forget: the driver remembers what it last commanded but
/// never reads the port back.
pub struct RelayDriver {
    board: Box<dyn Daq>,
    port: DigitalPort,
    bits: Vec<u8>,
    states: Vec<bool>,
}

impl RelayDriver {
    pub fn new(board: Box<dyn Daq>, port: DigitalPort, bits: Vec<u8>) -> Self {
        let states = vec![false; bits.len()];
        Self {
            board,
            port,
            bits,
            states,
        }
    }

    pub fn configure(&mut self) -> Result<(), DaqError> {
        self.board.configure_port(self.port, PortDirection::Output)
    }

    pub fn set(&mut self, index: usize, on: bool) -> Result<(), DaqError> {
        let bit = *self.bits.get(index).ok_or(DaqError::NoSuchRelay(index))?;
        self.board.write_bit(self.port, bit, on)?;
        self.states[index] = on;
        Ok(())
    }

    #[cfg(test)]
    pub fn is_on(&self, index: usize) -> bool {
        self.states.get(index).copied().unwrap_or(false)
    }

    /// Writes `off` to every relay, whatever its tracked state. Every bit is
    /// attempted; the first failure is returned.
    pub fn all_off(&mut self) -> Result<(), DaqError> {
        let were_on = self.states.iter().filter(|on| **on).count();
        log::debug!("switching all relays off ({were_on} of {} on)", self.bits.len());
        let mut first_err = None;
        for index in 0..self.bits.len() {
            if let Err(e) = self.set(index, false) {
                log::error!("failed to switch relay {index} off: {e}");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn board_mut(&mut self) -> &mut dyn Daq {
        self.board.as_mut()
    }

    pub fn into_board(self) -> Box<dyn Daq> {
        self.board
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::SimulatedBoard;

    fn driver(bits: Vec<u8>) -> (RelayDriver, crate::drivers::SimProbe) {
        let board = SimulatedBoard::new();
        let probe = board.probe();
        (
            RelayDriver::new(Box::new(board), DigitalPort::FirstPortA, bits),
            probe,
        )
    }

    #[test]
    fn set_issues_exactly_one_write() {
        let (mut relays, probe) = driver(vec![0, 1, 2, 3]);
        relays.set(2, true).unwrap();
        let writes = probe.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].bit, 2);
        assert!(writes[0].high);
        let on: Vec<_> = (0..4).map(|i| relays.is_on(i)).collect();
        assert_eq!(on, vec![false, false, true, false]);
    }

    #[test]
    fn all_off_writes_every_bit() {
        let (mut relays, probe) = driver(vec![4, 5]);
        relays.set(0, true).unwrap();
        relays.all_off().unwrap();
        assert_eq!(probe.writes().len(), 3);
        assert_eq!(probe.last_write(4), Some(false));
        assert_eq!(probe.last_write(5), Some(false));
        assert!(!relays.is_on(0));
    }

    #[test]
    fn failed_write_keeps_tracked_state() {
        let (mut relays, probe) = driver(vec![0]);
        probe.fail_writes(true);
        assert!(relays.set(0, true).is_err());
        assert!(!relays.is_on(0));
        assert!(relays.all_off().is_err());
    }

    #[test]
    fn unknown_index_is_rejected() {
        let (mut relays, _) = driver(vec![0]);
        assert!(matches!(relays.set(3, true), Err(DaqError::NoSuchRelay(3))));
    }

    #[test]
    fn configure_sets_port_to_output() {
        let (mut relays, probe) = driver(vec![0]);
        relays.configure().unwrap();
        assert_eq!(
            probe.configured(),
            vec![(DigitalPort::FirstPortA, PortDirection::Output)]
        );
    }
}
