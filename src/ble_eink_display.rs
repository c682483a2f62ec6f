//! E-ink message board.
//!
//! Text written to the display characteristic is drawn on a Waveshare 2.13" panel and
//! mirrored on the read buffer as `Display: <text>`. The command characteristic takes
//! `clear` and `refresh`. Every operation is reported on the status characteristic and
//! notified as `<operation> - <status>`.

use core::fmt::Write as _;

use embassy_futures::join::join;
use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;
use embedded_hal_async::spi::SpiDevice;
use heapless::{String, Vec};
use trouble_host::prelude::*;

use crate::common::{self, advertise, ble_task, next_step, short_string, AdServices, Step};
use crate::config::{AdvertisingConfig, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX};
use crate::dispatch::{Dispatcher, GattStatus, Outcome, Role};
use crate::eink::{draw_text, DisplayCommand, Epd2in13, FrameBuffer};
use crate::event::{AttrHandle, BleEvent};
use crate::indicator::StatusLed;
use crate::link::LinkState;

/// `E1234000-A5A5-F5F5-C5C5-111122223333`, little endian.
pub const EINK_SERVICE: [u8; 16] = [
    0x33, 0x33, 0x22, 0x22, 0x11, 0x11, 0xc5, 0xc5, 0xf5, 0xf5, 0xa5, 0xa5, 0x00, 0x40, 0x23, 0xe1,
];

/// Longest text kept for the panel.
pub const TEXT_MAX: usize = 128;
pub const STATUS_MAX: usize = 48;

const BUFFER_PREFIX: &str = "Display: ";

// GATT Server definition
#[gatt_server]
struct Server {
    eink: EinkService,
}

#[gatt_service(uuid = "e1234000-a5a5-f5f5-c5c5-111122223333")]
struct EinkService {
    /// `Display: <text>`
    #[characteristic(uuid = "e1234001-a5a5-f5f5-c5c5-111122223333", read, notify)]
    buffer: String<144>,
    #[characteristic(uuid = "e1234002-a5a5-f5f5-c5c5-111122223333", read)]
    status: String<STATUS_MAX>,
    #[characteristic(uuid = "e1234003-a5a5-f5f5-c5c5-111122223333", write)]
    display: Vec<u8, TEXT_MAX>,
    #[characteristic(uuid = "e1234004-a5a5-f5f5-c5c5-111122223333", write)]
    command: Vec<u8, 32>,
    /// Operation log.
    #[characteristic(uuid = "e1234005-a5a5-f5f5-c5c5-111122223333", read, notify)]
    notice: String<64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EinkHandles {
    pub buffer: AttrHandle,
    pub display: AttrHandle,
    pub command: AttrHandle,
}

/// What the panel has to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Panel {
    Keep,
    Draw(String<TEXT_MAX>),
    Clear,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EinkEffect {
    pub panel: Panel,
    pub operation: &'static str,
    pub status: String<STATUS_MAX>,
}

impl EinkEffect {
    fn new(panel: Panel, operation: &'static str, status: &str) -> Self {
        Self {
            panel,
            operation,
            status: short_string(status),
        }
    }

    /// Text notified on the operation log.
    pub fn notice(&self) -> String<64> {
        let mut s = String::new();
        let _ = write!(s, "{} - {}", self.operation, self.status.as_str());
        s
    }
}

pub struct EinkRole {
    handles: EinkHandles,
    text: String<TEXT_MAX>,
}

impl EinkRole {
    pub fn new(handles: EinkHandles) -> Self {
        Self {
            handles,
            text: String::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Content of the read buffer characteristic.
    pub fn buffer(&self) -> String<144> {
        let mut s = String::new();
        let _ = write!(s, "{}{}", BUFFER_PREFIX, self.text.as_str());
        s
    }

    fn command(&mut self, data: &[u8]) -> EinkEffect {
        match DisplayCommand::parse(data) {
            DisplayCommand::Clear => {
                self.text.clear();
                EinkEffect::new(Panel::Clear, "Command", "Display cleared")
            }
            DisplayCommand::Refresh => EinkEffect::new(Panel::Refresh, "Command", "Display refreshed"),
            DisplayCommand::Unknown(cmd) => {
                let mut status: String<STATUS_MAX> = String::new();
                let _ = write!(status, "Unknown command: {}", cmd);
                EinkEffect::new(Panel::Keep, "Command", &status)
            }
        }
    }
}

impl Role for EinkRole {
    type Effect = EinkEffect;

    fn on_event<const N: usize>(&mut self, _link: &LinkState<N>, event: &BleEvent<'_>) -> Outcome<EinkEffect> {
        match *event {
            BleEvent::CentralConnect { conn, .. } => {
                info!("[eink] connected: {:?}", conn);
                Outcome::silent().with(EinkEffect::new(Panel::Keep, "Connection", "Connected"))
            }
            BleEvent::CentralDisconnect { conn, .. } => {
                info!("[eink] disconnected: {:?}", conn);
                Outcome::silent().with(EinkEffect::new(Panel::Keep, "Connection", "Disconnected"))
            }
            BleEvent::GattsWrite { attr, data, .. } if attr == self.handles.display => match core::str::from_utf8(data) {
                Ok(text) => {
                    self.text = short_string(text);
                    let panel = Panel::Draw(self.text.clone());
                    Outcome::accept().with(EinkEffect::new(panel, "Write", "Display updated"))
                }
                Err(_) => {
                    warn!("[eink] display text is not UTF-8");
                    Outcome::reject(GattStatus::ValueNotAllowed)
                }
            },
            BleEvent::GattsWrite { attr, data, .. } if attr == self.handles.command => {
                Outcome::accept().with(self.command(data))
            }
            BleEvent::GattsReadRequest { attr, .. } if attr == self.handles.buffer => {
                Outcome::accept().with(EinkEffect::new(Panel::Keep, "Read", "Buffer read"))
            }
            _ => Outcome::ack(event),
        }
    }
}

pub async fn run<C, SPI, DC, RST, BUSY, D, S>(controller: C, mut epd: Epd2in13<SPI, DC, RST, BUSY, D>, mut status_led: S)
where
    C: Controller,
    SPI: SpiDevice,
    DC: OutputPin,
    RST: OutputPin<Error = DC::Error>,
    BUSY: Wait<Error = DC::Error>,
    D: DelayNs,
    S: StatusLed,
{
    let config = AdvertisingConfig::named("eink-display", [0xff, 0x8f, 0x1a, 0x05, 0xe4, 0xfb]);
    let address: Address = Address::random(config.address);
    info!("Our address = {:?}", address);

    let mut resources: HostResources<DefaultPacketPool, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX> = HostResources::new();
    let stack = trouble_host::new(controller, &mut resources).set_random_address(address);
    let Host {
        mut peripheral, runner, ..
    } = stack.build();

    let server = unwrap!(Server::new_with_config(GapConfig::Peripheral(PeripheralConfig {
        name: config.name,
        appearance: &appearance::power_device::GENERIC_POWER_DEVICE,
    })));
    let handles = EinkHandles {
        buffer: AttrHandle(server.eink.buffer.handle),
        display: AttrHandle(server.eink.display.handle),
        command: AttrHandle(server.eink.command.handle),
    };
    let mut dispatcher: Dispatcher<EinkRole, CONNECTIONS_MAX> = Dispatcher::new(EinkRole::new(handles));
    let mut panel = Screen {
        epd: &mut epd,
        frame: FrameBuffer::new(),
    };

    if let Err(e) = server.set(&server.eink.buffer, &short_string("Empty Buffer")) {
        warn!("[eink] error setting buffer: {:?}", e);
    }
    if let Err(e) = server.set(&server.eink.status, &short_string("Ready")) {
        warn!("[eink] error setting status: {:?}", e);
    }
    if let Err(e) = server.set(&server.eink.notice, &short_string("System Ready")) {
        warn!("[eink] error setting notice: {:?}", e);
    }
    panel.clear().await;

    let _ = join(ble_task(runner), async {
        loop {
            match advertise(config.name, AdServices::Long(&EINK_SERVICE), &mut peripheral).await {
                Ok(conn) => match conn.with_attribute_server(&server) {
                    Ok(conn) => {
                        status_led.set(true).await;
                        serve(&server, &conn, &mut dispatcher, &mut panel).await;
                        status_led.set(false).await;
                    }
                    Err(e) => error!("[gatt] error attaching server: {:?}", e),
                },
                Err(e) => {
                    #[cfg(feature = "defmt")]
                    let e = defmt::Debug2Format(&e);
                    error!("[adv] error: {:?}", e);
                }
            }
        }
    })
    .await;
}

/// Stream events until the connection closes.
async fn serve<SPI, DC, RST, BUSY, D>(
    server: &Server<'_>,
    conn: &GattConnection<'_, '_, DefaultPacketPool>,
    dispatcher: &mut Dispatcher<EinkRole, CONNECTIONS_MAX>,
    panel: &mut Screen<'_, SPI, DC, RST, BUSY, D>,
) where
    SPI: SpiDevice,
    DC: OutputPin,
    RST: OutputPin<Error = DC::Error>,
    BUSY: Wait<Error = DC::Error>,
    D: DelayNs,
{
    if let Some(effect) = common::open(conn.raw(), dispatcher) {
        apply(server, conn, dispatcher, panel, effect).await;
    }
    loop {
        match next_step(conn, dispatcher).await {
            Step::Continue(effects) => {
                for effect in effects {
                    apply(server, conn, dispatcher, panel, effect).await;
                }
            }
            Step::Closed(effect) => {
                if let Some(effect) = effect {
                    apply(server, conn, dispatcher, panel, effect).await;
                }
                break;
            }
        }
    }
}

async fn apply<SPI, DC, RST, BUSY, D>(
    server: &Server<'_>,
    conn: &GattConnection<'_, '_, DefaultPacketPool>,
    dispatcher: &Dispatcher<EinkRole, CONNECTIONS_MAX>,
    panel: &mut Screen<'_, SPI, DC, RST, BUSY, D>,
    mut effect: EinkEffect,
) where
    SPI: SpiDevice,
    DC: OutputPin,
    RST: OutputPin<Error = DC::Error>,
    BUSY: Wait<Error = DC::Error>,
    D: DelayNs,
{
    let ok = match &effect.panel {
        Panel::Keep => true,
        Panel::Draw(text) => panel.draw(text).await,
        Panel::Clear => panel.clear().await,
        Panel::Refresh => panel.refresh().await,
    };
    if !ok {
        effect.status = short_string("Display error");
    }
    if effect.panel != Panel::Keep {
        let buffer = dispatcher.role().buffer();
        if let Err(e) = server.set(&server.eink.buffer, &buffer) {
            warn!("[eink] error setting buffer: {:?}", e);
        }
    }
    info!("[eink] {} - {}", effect.operation, effect.status.as_str());
    if let Err(e) = server.set(&server.eink.status, &effect.status) {
        warn!("[eink] error setting status: {:?}", e);
    }
    if dispatcher.link().any_connected() {
        if let Err(e) = server.eink.notice.notify(conn, &effect.notice()).await {
            debug!("[eink] notice not sent: {:?}", e);
        }
    }
}

/// Panel plus the frame it shows. The panel sleeps between updates.
struct Screen<'a, SPI, DC, RST, BUSY, D> {
    epd: &'a mut Epd2in13<SPI, DC, RST, BUSY, D>,
    frame: FrameBuffer,
}

impl<SPI, DC, RST, BUSY, D> Screen<'_, SPI, DC, RST, BUSY, D>
where
    SPI: SpiDevice,
    DC: OutputPin,
    RST: OutputPin<Error = DC::Error>,
    BUSY: Wait<Error = DC::Error>,
    D: DelayNs,
{
    async fn draw(&mut self, text: &str) -> bool {
        let lines = draw_text(&mut self.frame, text);
        debug!("[eink] drawing {} lines", lines);
        self.update(false).await
    }

    async fn clear(&mut self) -> bool {
        draw_text(&mut self.frame, "");
        self.update(true).await
    }

    async fn refresh(&mut self) -> bool {
        self.update(false).await
    }

    async fn update(&mut self, blank: bool) -> bool {
        let result = async {
            self.epd.init().await?;
            if blank {
                self.epd.clear().await?;
            } else {
                self.epd.display(&self.frame).await?;
            }
            self.epd.sleep().await
        }
        .await;
        match result {
            Ok(()) => true,
            Err(e) => {
                #[cfg(feature = "defmt")]
                let e = defmt::Debug2Format(&e);
                warn!("[eink] panel error: {:?}", e);
                false
            }
        }
    }
}
