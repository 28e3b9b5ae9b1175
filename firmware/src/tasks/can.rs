//! CAN通信タスク
//!
//! 診断コマンドの受信、フォルトステータスの周期送信、
//! イベントログのダンプを行います。

use core::cell::{Cell, RefCell};

use embassy_stm32::can;
use embassy_time::{Duration, Ticker, Timer};
use embedded_can::{Id, StandardId};
use svm_diag::can_protocol::{
    can_ids, encode_event_record, encode_fault_status, parse_frame, Command,
};
use svm_diag::config::EVENT_LOG_SIZE;
use svm_diag::EventRecord;

use crate::config;
use crate::fmt::*;
use crate::state::{CONTROLLER, RESET_REQUEST};

/// 標準IDのデータフレームを送信
async fn send(tx: &mut can::CanTx<'static>, id: u32, data: &[u8]) {
    if let Some(std_id) = StandardId::new(id as u16) {
        if let Ok(frame) = can::frame::Frame::new_data(Id::Standard(std_id), data) {
            let _ = tx.write(&frame).await;
        }
    }
}

/// 送信中のイベントダンプ
///
/// 要求時点のログをコピーし、ステータス周期ごとに数スロットずつ送る。
/// スロットは2フレームとも送信してから進めるので、受信で送信が
/// 中断されても次の周期で同じスロットから再開する。
struct EventDump {
    records: RefCell<[EventRecord; EVENT_LOG_SIZE]>,
    next_slot: Cell<Option<usize>>,
}

impl EventDump {
    const fn new() -> Self {
        Self {
            records: RefCell::new([EventRecord::EMPTY; EVENT_LOG_SIZE]),
            next_slot: Cell::new(None),
        }
    }

    /// スナップショットを取り直して先頭から送信（送信中なら最初からやり直し）
    fn start(&self, records: &[EventRecord; EVENT_LOG_SIZE], index: usize) {
        *self.records.borrow_mut() = *records;
        self.next_slot.set(Some(0));
        info!("Dumping event log ({} slots, index {})", EVENT_LOG_SIZE, index);
    }

    /// 最大 DUMP_SLOTS_PER_TICK スロットを送信（スロット番号順、空スロットはコード0）
    async fn send_chunk(&self, tx: &mut can::CanTx<'static>) {
        for _ in 0..config::can::DUMP_SLOTS_PER_TICK {
            let Some(slot) = self.next_slot.get() else {
                return;
            };
            // 送信待ちの間は借用を持たない
            let record = self.records.borrow()[slot];

            let (time, data) = encode_event_record(slot as u8, &record);
            send(tx, can_ids::EVENT_TIME, &time).await;
            send(tx, can_ids::EVENT_DATA, &data).await;

            if slot + 1 < EVENT_LOG_SIZE {
                self.next_slot.set(Some(slot + 1));
            } else {
                self.next_slot.set(None);
                info!("Event log dump complete");
            }
            Timer::after(Duration::from_micros(config::can::DUMP_FRAME_GAP_US)).await;
        }
    }
}

/// CAN通信タスク - 診断コマンド処理とステータス送信
#[embassy_executor::task]
pub async fn can_task(can: can::Can<'static>) {
    let (mut tx, mut rx, _properties) = can.split();

    info!("CAN diagnostics task started");

    let mut status_ticker = Ticker::every(Duration::from_millis(config::can::STATUS_PERIOD_MS));
    let mut bus_errors: u32 = 0;
    let dump = EventDump::new();

    loop {
        embassy_futures::select::select(
            async {
                match rx.read().await {
                    Ok(envelope) => {
                        let frame = envelope.frame;
                        let data = frame.data();
                        let id = *frame.header().id();

                        // 拡張IDのフレームは対象外
                        let Some(command) = parse_frame(id, data) else {
                            match id {
                                Id::Standard(std_id) => debug!(
                                    "Unhandled CAN frame: 0x{:03X} {}",
                                    std_id.as_raw(),
                                    Bytes(data)
                                ),
                                Id::Extended(ext_id) => debug!(
                                    "Extended CAN frame ignored: 0x{:08X}",
                                    ext_id.as_raw()
                                ),
                            }
                            return;
                        };

                        if command == Command::DumpEvents {
                            if let Some(ctrl) = CONTROLLER.lock().await.as_ref() {
                                dump.start(ctrl.events().records(), ctrl.events().index());
                            }
                            return;
                        }

                        let pulse = match CONTROLLER.lock().await.as_mut() {
                            Some(ctrl) => ctrl.handle_command(command),
                            None => None,
                        };
                        if let Some(pulse) = pulse {
                            RESET_REQUEST.signal(pulse);
                        }
                    }
                    Err(_e) => {
                        bus_errors = bus_errors.wrapping_add(1);
                        if let Some(ctrl) = CONTROLLER.lock().await.as_mut() {
                            ctrl.report_bus_error(bus_errors);
                        }
                    }
                }
            },
            async {
                status_ticker.next().await;

                // フォルトステータス送信 (ID 0x282)
                let status = CONTROLLER
                    .lock()
                    .await
                    .as_ref()
                    .map(|ctrl| encode_fault_status(ctrl.fault_word(), ctrl.state()));
                if let Some(data) = status {
                    send(&mut tx, can_ids::FAULT_STATUS, &data).await;
                }

                dump.send_chunk(&mut tx).await;
            },
        )
        .await;
    }
}
