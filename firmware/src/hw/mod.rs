//! Board bring-up for the tracker hardware.
//!
//! Modem UART, the GNSS antenna supply rail and the two PIR inputs. The
//! modem's own power rails come up with the board; PWRKEY cycling lives in
//! the modem collaborator's fallback path, not here.

use embassy_stm32::Peripherals;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, Output, Pull, Speed};
use embassy_stm32::mode::Blocking;
use embassy_stm32::usart::{Config as UartConfig, Uart};

pub struct Board {
    pub modem_uart: Uart<'static, Blocking>,
    pub pir_front: ExtiInput<'static>,
    pub pir_back: ExtiInput<'static>,
    pub gnss_antenna_rail: Output<'static>,
}

pub fn init() -> Board {
    let p: Peripherals = embassy_stm32::init(embassy_stm32::Config::default());

    let mut uart_config = UartConfig::default();
    uart_config.baudrate = 115_200;
    let modem_uart = Uart::new_blocking(p.USART1, p.PA10, p.PA9, uart_config)
        .expect("modem UART configuration is static and must be valid");

    // Most PIR modules emit an active-high pulse: trigger on the rising edge.
    let pir_front = ExtiInput::new(p.PA0, p.EXTI0, Pull::Down);
    let pir_back = ExtiInput::new(p.PA1, p.EXTI1, Pull::Down);

    // Active antenna feed for the GNSS front end.
    let gnss_antenna_rail = Output::new(p.PB0, Level::High, Speed::Low);

    Board {
        modem_uart,
        pir_front,
        pir_back,
        gnss_antenna_rail,
    }
}
