//! BMI160 accelerometer over SPI, FIFO watermark mode.
//!
//! Only what the acquisition loop needs: reset, accel at 100 Hz into a
//! headerless FIFO, watermark on INT1 (active-low), FIFO length / read /
//! flush.

use biosig_ble::acquisition::watermark_register;
use biosig_ble::config::WATERMARK_FRAMES;
use defmt::{info, Format};
use embassy_time::Timer;
use embedded_hal::digital::OutputPin;
use embedded_hal_async::spi::SpiBus;

const CHIP_ID: u8 = 0xD1;

const REG_CHIP_ID: u8 = 0x00;
const REG_FIFO_LENGTH_0: u8 = 0x22;
const REG_FIFO_DATA: u8 = 0x24;
const REG_ACC_CONF: u8 = 0x40;
const REG_ACC_RANGE: u8 = 0x41;
const REG_FIFO_CONFIG_0: u8 = 0x46;
const REG_FIFO_CONFIG_1: u8 = 0x47;
const REG_INT_EN_1: u8 = 0x51;
const REG_INT_OUT_CTRL: u8 = 0x53;
const REG_INT_MAP_1: u8 = 0x56;
const REG_SPI_SWITCH: u8 = 0x7F;
const REG_CMD: u8 = 0x7E;

const CMD_SOFT_RESET: u8 = 0xB6;
const CMD_ACC_NORMAL: u8 = 0x11;
const CMD_FIFO_FLUSH: u8 = 0xB0;

/// ODR 100 Hz, normal filter.
const ACC_CONF_100HZ: u8 = 0x28;
/// ±2 g.
const ACC_RANGE_2G: u8 = 0x03;
/// Accel frames only, no headers.
const FIFO_ACC_HEADERLESS: u8 = 1 << 6;
const INT_FWM_EN: u8 = 1 << 6;
/// INT1 push-pull output, active-low.
const INT1_OUTPUT_EN: u8 = 1 << 3;
const INT1_MAP_FWM: u8 = 1 << 6;

const READ: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum SensorError {
    Spi,
    ChipSelect,
    WrongChipId(u8),
}

pub struct Bmi160<SPI, CS> {
    spi: SPI,
    cs: CS,
}

impl<SPI: SpiBus, CS: OutputPin> Bmi160<SPI, CS> {
    pub fn new(spi: SPI, cs: CS) -> Self {
        Self { spi, cs }
    }

    /// Reset, verify the chip and enable the accel FIFO watermark path.
    pub async fn init(&mut self) -> Result<(), SensorError> {
        self.write_reg(REG_CMD, CMD_SOFT_RESET).await?;
        Timer::after_millis(1).await;
        // a read on 0x7F latches the interface into SPI mode
        self.read_reg(REG_SPI_SWITCH).await?;

        let id = self.read_reg(REG_CHIP_ID).await?;
        if id != CHIP_ID {
            return Err(SensorError::WrongChipId(id));
        }

        self.write_reg(REG_CMD, CMD_ACC_NORMAL).await?;
        Timer::after_millis(4).await;
        self.write_reg(REG_ACC_CONF, ACC_CONF_100HZ).await?;
        self.write_reg(REG_ACC_RANGE, ACC_RANGE_2G).await?;

        self.write_reg(REG_FIFO_CONFIG_0, watermark_register(WATERMARK_FRAMES)).await?;
        self.write_reg(REG_FIFO_CONFIG_1, FIFO_ACC_HEADERLESS).await?;
        self.write_reg(REG_INT_OUT_CTRL, INT1_OUTPUT_EN).await?;
        self.write_reg(REG_INT_MAP_1, INT1_MAP_FWM).await?;
        self.write_reg(REG_INT_EN_1, INT_FWM_EN).await?;
        self.flush_fifo().await?;

        info!("BMI160 ready, watermark {} frames", WATERMARK_FRAMES);
        Ok(())
    }

    /// Bytes currently in the FIFO.
    pub async fn fifo_length(&mut self) -> Result<usize, SensorError> {
        let mut buf = [0u8; 2];
        self.read_regs(REG_FIFO_LENGTH_0, &mut buf).await?;
        Ok(usize::from(u16::from_le_bytes(buf) & 0x07FF))
    }

    /// Burst-read `buf.len()` bytes of FIFO data.
    pub async fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), SensorError> {
        self.read_regs(REG_FIFO_DATA, buf).await
    }

    pub async fn flush_fifo(&mut self) -> Result<(), SensorError> {
        self.write_reg(REG_CMD, CMD_FIFO_FLUSH).await
    }

    async fn read_reg(&mut self, reg: u8) -> Result<u8, SensorError> {
        let mut buf = [0u8; 1];
        self.read_regs(reg, &mut buf).await?;
        Ok(buf[0])
    }

    async fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), SensorError> {
        let frame = [reg, value];
        self.cs.set_low().map_err(|_| SensorError::ChipSelect)?;
        let result = self.spi.write(&frame).await;
        let flushed = self.spi.flush().await;
        self.cs.set_high().map_err(|_| SensorError::ChipSelect)?;
        result.and(flushed).map_err(|_| SensorError::Spi)
    }

    async fn read_regs(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), SensorError> {
        let addr = [reg | READ];
        self.cs.set_low().map_err(|_| SensorError::ChipSelect)?;
        let mut result = self.spi.write(&addr).await;
        if result.is_ok() {
            result = self.spi.read(buf).await;
        }
        let flushed = self.spi.flush().await;
        self.cs.set_high().map_err(|_| SensorError::ChipSelect)?;
        result.and(flushed).map_err(|_| SensorError::Spi)
    }
}
