//! Minimal AT-command transport over the shared modem UART.
//!
//! The SIM7080-class module multiplexes GNSS, the cellular stack and the
//! MQTT session over one command channel. Every wait here is bounded by a
//! caller-supplied timeout; the control task budgets those waits inside its
//! step deadlines.

use core::time::Duration;

use embassy_stm32::mode::Blocking;
use embassy_stm32::usart::Uart;
use embassy_time::Instant;
use heapless::String;

/// Longest response line we retain.
pub const MAX_LINE_LEN: usize = 256;

pub type ResponseLine = String<MAX_LINE_LEN>;

fn to_embassy(duration: Duration) -> embassy_time::Duration {
    let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    embassy_time::Duration::from_micros(micros)
}

pub struct AtBus<'d> {
    uart: Uart<'d, Blocking>,
}

impl<'d> AtBus<'d> {
    pub fn new(uart: Uart<'d, Blocking>) -> Self {
        Self { uart }
    }

    fn flush_input(&mut self) {
        while self.uart.nb_read().is_ok() {}
    }

    fn write_raw(&mut self, bytes: &[u8]) {
        let _ = self.uart.blocking_write(bytes);
    }

    fn write_line(&mut self, command: &str) {
        self.write_raw(command.as_bytes());
        self.write_raw(b"\r\n");
    }

    /// Accumulates one newline-terminated response line before `deadline`.
    fn read_line(&mut self, line: &mut ResponseLine, deadline: Instant) -> bool {
        line.clear();
        loop {
            if Instant::now() >= deadline {
                return false;
            }
            match self.uart.nb_read() {
                Ok(b'\r') => {}
                Ok(b'\n') => {
                    if !line.is_empty() {
                        return true;
                    }
                }
                Ok(byte) => {
                    let _ = line.push(char::from(byte));
                }
                Err(_) => {}
            }
        }
    }

    /// Sends a command and waits for the final `OK`/`ERROR` verdict.
    pub fn command_ok(&mut self, command: &str, timeout: Duration) -> bool {
        self.flush_input();
        self.write_line(command);

        let deadline = Instant::now() + to_embassy(timeout);
        let mut line = ResponseLine::new();
        while self.read_line(&mut line, deadline) {
            match line.as_str().trim() {
                "OK" => return true,
                "ERROR" => return false,
                _ => {}
            }
        }
        false
    }

    /// Sends a command and captures the response line starting with
    /// `prefix`, consuming through the final `OK`.
    pub fn command_line(
        &mut self,
        command: &str,
        prefix: &str,
        timeout: Duration,
    ) -> Option<ResponseLine> {
        self.flush_input();
        self.write_line(command);

        let deadline = Instant::now() + to_embassy(timeout);
        let mut line = ResponseLine::new();
        let mut captured: Option<ResponseLine> = None;
        while self.read_line(&mut line, deadline) {
            let trimmed = line.as_str().trim();
            if trimmed.starts_with(prefix) {
                let mut keep = ResponseLine::new();
                let _ = keep.push_str(trimmed);
                captured = Some(keep);
            }
            if trimmed == "OK" {
                return captured;
            }
            if trimmed == "ERROR" {
                return None;
            }
        }
        captured
    }

    /// Sends a command expecting a `>` prompt, then streams `payload` and
    /// waits for the final verdict. Used by the session publish path.
    pub fn command_payload(&mut self, command: &str, payload: &[u8], timeout: Duration) -> bool {
        self.flush_input();
        self.write_line(command);

        let deadline = Instant::now() + to_embassy(timeout);
        loop {
            if Instant::now() >= deadline {
                return false;
            }
            match self.uart.nb_read() {
                Ok(b'>') => break,
                Ok(_) | Err(_) => {}
            }
        }

        self.write_raw(payload);

        let mut line = ResponseLine::new();
        while self.read_line(&mut line, deadline) {
            match line.as_str().trim() {
                "OK" => return true,
                "ERROR" => return false,
                _ => {}
            }
        }
        false
    }

    /// Non-blocking poll for one unsolicited result line.
    pub fn poll_urc(&mut self) -> Option<ResponseLine> {
        let deadline = Instant::now() + embassy_time::Duration::from_millis(20);
        let mut line = ResponseLine::new();
        if self.read_line(&mut line, deadline) {
            let mut keep = ResponseLine::new();
            let _ = keep.push_str(line.as_str().trim());
            Some(keep)
        } else {
            None
        }
    }
}
