use bit_set::BitSet;
use fxhash::FxHashMap;
use std::collections::BTreeMap;

use super::channel_map::MappingIndex;
use super::event::{
    DaqError, DetectorRead, Event, EventId, Message, SlowControl, SlowControlKind, Validity,
};

/// One hit word: the low half is the raw channel, the high half the value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHit {
    pub channel: u16,
    pub value: u16,
}

impl RawHit {
    pub fn from_word(word: u32) -> Self {
        Self {
            channel: (word & 0xFFFF) as u16,
            value: (word >> 16) as u16,
        }
    }
}

/// Multi-hit storage keeping raw channels in the order they were first seen
#[derive(Debug, Default)]
struct HitStorage {
    order: Vec<u16>,
    values: FxHashMap<u16, Vec<u16>>,
}

impl HitStorage {
    fn add(&mut self, hit: RawHit) {
        let values = self.values.entry(hit.channel).or_insert_with(|| {
            self.order.push(hit.channel);
            Vec::new()
        });
        values.push(hit.value);
    }

    fn get(&self, channel: u16) -> Option<&[u16]> {
        self.values.get(&channel).map(|v| v.as_slice())
    }
}

/// EventBuilder collects the content of one event while its sub-records are unpacked.
///
/// Nothing is translated until the event end was found, so an aborted event can simply
/// be dropped (keeping only its messages).
#[derive(Debug, Default)]
pub struct EventBuilder {
    hits: HitStorage,
    scalers: BTreeMap<u32, Vec<u32>>,
    slow_controls: Vec<SlowControl>,
    daq_errors: Vec<DaqError>,
    messages: Vec<Message>,
}

impl EventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_hit(&mut self, hit: RawHit) {
        self.hits.add(hit);
    }

    pub fn add_scaler(&mut self, index: u32, value: u32) {
        self.scalers.entry(index).or_default().push(value);
    }

    pub fn add_slow_control(&mut self, slow_control: SlowControl) {
        self.slow_controls.push(slow_control);
    }

    pub fn add_daq_error(&mut self, error: DaqError) {
        self.daq_errors.push(error);
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Give up on the event, keeping only what was reported so far
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Translate the collected raw content into an Event.
    ///
    /// `pending` holds messages produced before this event which could not be attached
    /// anywhere; they are put in front of the event's own messages.
    pub fn build(
        self,
        id: EventId,
        mapping: &MappingIndex,
        timestamp: i64,
        mut pending: Vec<Message>,
    ) -> Event {
        let mut detector_reads = Vec::new();
        self.fill_hits(mapping, &mut detector_reads);
        let mut slow_controls = self.slow_controls;
        fill_scalers(
            &self.scalers,
            mapping,
            timestamp,
            &mut detector_reads,
            &mut slow_controls,
        );

        pending.extend(self.messages);
        Event {
            id,
            detector_reads,
            slow_controls,
            daq_errors: self.daq_errors,
            messages: pending,
        }
    }

    fn fill_hits(&self, mapping: &MappingIndex, reads: &mut Vec<DetectorRead>) {
        let mut handled = BitSet::with_capacity(mapping.n_hits());
        for channel in self.hits.order.iter() {
            for entry in mapping.hit_entries(*channel) {
                if !handled.insert(*entry) {
                    continue;
                }
                let mapped = mapping.hit(*entry);
                // The entry only fires if every raw channel it needs was hit
                let Some(columns) = mapped
                    .raw_channels
                    .iter()
                    .map(|raw| self.hits.get(raw.channel))
                    .collect::<Option<Vec<&[u16]>>>()
                else {
                    continue;
                };
                let n_values = columns.iter().map(|c| c.len()).min().unwrap_or(0);
                let values = (0..n_values)
                    .map(|hit_idx| {
                        mapped.raw_channels.iter().zip(columns.iter()).enumerate().fold(
                            0u32,
                            |value, (part, (raw, column))| {
                                let masked = (column[hit_idx] & raw.mask) as u32;
                                value | masked.checked_shl(16 * part as u32).unwrap_or(0)
                            },
                        )
                    })
                    .collect();
                reads.push(DetectorRead {
                    channel: mapped.logical,
                    values,
                });
            }
        }
    }
}

fn fill_scalers(
    scalers: &BTreeMap<u32, Vec<u32>>,
    mapping: &MappingIndex,
    timestamp: i64,
    reads: &mut Vec<DetectorRead>,
    slow_controls: &mut Vec<SlowControl>,
) {
    // Named scalers are grouped into one item per name, in order of first appearance
    let mut grouped: Vec<SlowControl> = Vec::new();
    for (raw, values) in scalers.iter() {
        for entry in mapping.scaler_entries(*raw) {
            let mapped = mapping.scaler(*entry);
            match &mapped.slow_control {
                None => reads.push(DetectorRead {
                    channel: mapped.logical,
                    values: values.clone(),
                }),
                Some(name) => {
                    let position = match grouped.iter().position(|s| s.name == *name) {
                        Some(p) => p,
                        None => {
                            grouped.push(SlowControl::new(
                                SlowControlKind::AcquScaler,
                                Validity::Backward,
                                timestamp,
                                name,
                                "",
                            ));
                            grouped.len() - 1
                        }
                    };
                    grouped[position].payload_int.extend(
                        values
                            .iter()
                            .map(|value| (mapped.logical.index, *value as i64)),
                    );
                }
            }
        }
    }
    slow_controls.extend(grouped);
}
