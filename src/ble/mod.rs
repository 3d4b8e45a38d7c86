//! Bluetooth Low Energy subsystem.
//!
//! Drives the Nordic SoftDevice S140 in **Peripheral** role:
//!
//! 1. **GATT server** - biosignal measurement (notify), Battery Service
//!    and the Device Information manufacturer name.
//! 2. **Peripheral loop** - advertise, accept one central, serve GATT
//!    until disconnect, repeat.
//! 3. **Transport** - [`SoftdeviceTransport`] adapts the generated notify
//!    call to [`NotifyTransport`] for the delivery link.
//!
//! Link state reaches the acquisition task as [`TransportEvent`]s on a
//! channel; the live `Connection` is shared through [`CONNECTION`].

pub mod bonding;

use core::cell::RefCell;

use biosig_ble::config::{
    BLE_ADV_INTERVAL, BLE_ATT_MTU, BLE_CONN_INTERVAL_MAX, BLE_CONN_INTERVAL_MIN, BLE_SLAVE_LATENCY,
    BLE_SUP_TIMEOUT, DEVICE_NAME, EVENT_QUEUE_DEPTH, MANUFACTURER_NAME, BUSY_POLL_INTERVAL_US,
};
use biosig_ble::frame::{FrameEncoder, MAX_PAYLOAD_CAPACITY};
use biosig_ble::{BleError, ConnHandle, Error, NotifyTransport, TransmitOutcome, TransportEvent};
use defmt::{debug, info, warn};
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Sender;
use embassy_time::{Duration, Timer};
use heapless::{String, Vec};
use nrf_softdevice::ble::advertisement_builder::{
    Flag, LegacyAdvertisementBuilder, LegacyAdvertisementPayload, ServiceList, ServiceUuid16,
};
use nrf_softdevice::ble::gatt_server::NotifyValueError;
use nrf_softdevice::ble::{gatt_server, peripheral, Connection};
use nrf_softdevice::{raw, RawError, Softdevice};

use crate::board::{LinkStatus, DISCONNECT_REQUEST, LINK_STATUS};
use bonding::Bonder;

/// One encoded frame as a characteristic value.
pub type FrameValue = Vec<u8, MAX_PAYLOAD_CAPACITY>;

/// Channel end the BLE side posts link events into.
pub type EventSender = Sender<'static, CriticalSectionRawMutex, TransportEvent, EVENT_QUEUE_DEPTH>;

/// Biosignal service UUID in advertising (little-endian) byte order.
const BIOSIG_SERVICE_UUID_LE: [u8; 16] = [
    0x01, 0x9b, 0x4d, 0x6f, 0x2e, 0x3c, 0x1d, 0x8a, 0x7b, 0x4f, 0x9c, 0x5e, 0x01, 0x00, 0x0a, 0xb1,
];

#[nrf_softdevice::gatt_service(uuid = "b10a0001-5e9c-4f7b-8a1d-3c2e6f4d9b01")]
pub struct BiosigService {
    #[characteristic(uuid = "b10a0002-5e9c-4f7b-8a1d-3c2e6f4d9b01", read, notify)]
    pub measurement: FrameValue,
}

#[nrf_softdevice::gatt_service(uuid = "180f")]
pub struct BatteryService {
    #[characteristic(uuid = "2a19", read, notify)]
    pub battery_level: u8,
}

#[nrf_softdevice::gatt_service(uuid = "180a")]
pub struct DeviceInformationService {
    #[characteristic(uuid = "2a29", read)]
    pub manufacturer_name: String<16>,
}

#[nrf_softdevice::gatt_server]
pub struct Server {
    pub biosig: BiosigService,
    pub bas: BatteryService,
    pub dis: DeviceInformationService,
}

/// The connection notifications go out on, if any.
pub static CONNECTION: Mutex<CriticalSectionRawMutex, RefCell<Option<Connection>>> = Mutex::new(RefCell::new(None));

fn current_connection() -> Option<Connection> {
    CONNECTION.lock(|c| c.borrow().clone())
}

/// Fill in the static characteristic values before advertising starts.
pub fn init_server(server: &Server, encoder: &FrameEncoder) -> Result<(), Error> {
    let mut initial = [0u8; MAX_PAYLOAD_CAPACITY];
    let len = encoder.initial_value(&mut initial)?;
    let value = FrameValue::from_slice(&initial[..len]).map_err(|_| BleError::ServerInitFailed)?;
    server
        .biosig
        .measurement_set(&value)
        .map_err(|_| BleError::ServerInitFailed)?;

    let mut name = String::new();
    let _ = name.push_str(MANUFACTURER_NAME);
    server
        .dis
        .manufacturer_name_set(&name)
        .map_err(|_| BleError::ServerInitFailed)?;
    server
        .bas
        .battery_level_set(&100)
        .map_err(|_| BleError::ServerInitFailed)?;
    Ok(())
}

/// Publish a battery level, notifying the central if one is connected.
pub fn update_battery_level(server: &Server, level: u8) {
    if let Err(e) = server.bas.battery_level_set(&level) {
        warn!("BAS: set failed: {}", e);
    }
    if let Some(conn) = current_connection() {
        // fails harmlessly while notifications are disabled
        let _ = server.bas.battery_level_notify(&conn, &level);
    }
}

/// [`NotifyTransport`] over the SoftDevice notify call.
///
/// The bindings consume `BLE_GATTS_EVT_HVN_TX_COMPLETE` internally, so this
/// transport never posts `TransmitComplete`; a busy send is re-offered once
/// per connection interval instead. `NRF_ERROR_DATA_SIZE` means the payload
/// is above the negotiated ATT MTU and feeds the link's limit search.
pub struct SoftdeviceTransport {
    server: &'static Server,
}

impl SoftdeviceTransport {
    pub fn new(server: &'static Server) -> Self {
        Self { server }
    }
}

impl NotifyTransport for SoftdeviceTransport {
    const SIGNALS_TX_COMPLETE: bool = false;

    fn notify(&mut self, _conn: ConnHandle, payload: &[u8]) -> TransmitOutcome {
        let Some(conn) = current_connection() else {
            return TransmitOutcome::NotConnected;
        };

        let take = payload.len().min(MAX_PAYLOAD_CAPACITY);
        let mut value = FrameValue::new();
        let _ = value.extend_from_slice(&payload[..take]);

        match self.server.biosig.measurement_notify(&conn, &value) {
            Ok(()) => TransmitOutcome::Accepted(value.len()),
            Err(NotifyValueError::Disconnected) => TransmitOutcome::NotConnected,
            Err(NotifyValueError::Raw(RawError::Resources)) => TransmitOutcome::Busy,
            Err(NotifyValueError::Raw(RawError::DataSize)) => TransmitOutcome::TooLarge,
            Err(NotifyValueError::Raw(e)) => TransmitOutcome::Failed(e as u32),
        }
    }

    async fn idle(&mut self) {
        Timer::after(Duration::from_micros(BUSY_POLL_INTERVAL_US)).await;
    }
}

static ADV_DATA: LegacyAdvertisementPayload = LegacyAdvertisementBuilder::new()
    .flags(&[Flag::GeneralDiscovery, Flag::LE_Only])
    .services_16(ServiceList::Incomplete, &[ServiceUuid16::BATTERY])
    .full_name(DEVICE_NAME)
    .build();

static SCAN_DATA: LegacyAdvertisementPayload = LegacyAdvertisementBuilder::new()
    .services_128(ServiceList::Complete, &[BIOSIG_SERVICE_UUID_LE])
    .build();

async fn advertise(sd: &'static Softdevice, bonder: &'static Bonder) -> Result<Connection, BleError> {
    let config = peripheral::Config {
        interval: BLE_ADV_INTERVAL,
        ..Default::default()
    };
    let adv = peripheral::ConnectableAdvertisement::ScannableUndirected {
        adv_data: &ADV_DATA,
        scan_data: &SCAN_DATA,
    };
    peripheral::advertise_pairable(sd, adv, &config, bonder)
        .await
        .map_err(|_| BleError::AdvertiseFailed)
}

fn request_conn_params(conn: &Connection) {
    let params = raw::ble_gap_conn_params_t {
        min_conn_interval: BLE_CONN_INTERVAL_MIN,
        max_conn_interval: BLE_CONN_INTERVAL_MAX,
        slave_latency: BLE_SLAVE_LATENCY,
        conn_sup_timeout: BLE_SUP_TIMEOUT,
    };
    if let Err(e) = conn.set_conn_params(params) {
        warn!("BLE: conn param update rejected: {}", e);
    }
}

/// Queue a link event, waiting for room rather than dropping it.
async fn post(events: &EventSender, event: TransportEvent) {
    if events.try_send(event).is_err() {
        debug!("BLE: event queue full, waiting to post {}", event);
        events.send(event).await;
    }
}

/// Advertise, serve one central until it leaves, repeat.
#[embassy_executor::task]
pub async fn peripheral_task(
    sd: &'static Softdevice,
    server: &'static Server,
    bonder: &'static Bonder,
    events: EventSender,
) -> ! {
    loop {
        LINK_STATUS.signal(LinkStatus::Advertising);
        info!("BLE: advertising as {}", DEVICE_NAME);

        let conn = match advertise(sd, bonder).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("BLE: {}", e);
                Timer::after(Duration::from_secs(1)).await;
                continue;
            }
        };
        let Some(handle) = conn.handle() else {
            continue;
        };

        info!("BLE: connected (handle {})", handle);
        request_conn_params(&conn);
        CONNECTION.lock(|c| *c.borrow_mut() = Some(conn.clone()));
        DISCONNECT_REQUEST.reset();
        post(&events, TransportEvent::Connected(ConnHandle(handle))).await;
        // the exchanged MTU is min(central, BLE_ATT_MTU) and is not reported back
        post(&events, TransportEvent::MtuCeiling(BLE_ATT_MTU)).await;
        LINK_STATUS.signal(LinkStatus::Connected);

        let served = gatt_server::run(&conn, server, |e| match e {
            ServerEvent::Biosig(BiosigServiceEvent::MeasurementCccdWrite { notifications }) => {
                info!("BLE: measurement notifications {}", notifications);
            }
            ServerEvent::Bas(BatteryServiceEvent::BatteryLevelCccdWrite { notifications }) => {
                info!("BLE: battery notifications {}", notifications);
            }
            _ => {}
        });

        match select(served, DISCONNECT_REQUEST.wait()).await {
            Either::First(_) => info!("BLE: central disconnected"),
            Either::Second(()) => {
                info!("BLE: disconnecting on request");
                let _ = conn.disconnect();
            }
        }

        CONNECTION.lock(|c| *c.borrow_mut() = None);
        post(&events, TransportEvent::Disconnected).await;
    }
}
