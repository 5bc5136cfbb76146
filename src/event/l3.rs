use serde::{Serialize, Serializer, ser::SerializeMap};
use serde_json::Value;

use crate::event::{CancellationEvent, OrderEvent, Trade};

/// One entry of a per-order (L3) market-data record.
#[derive(Debug, Clone)]
pub enum L3Entry {
    Place(OrderEvent),
    Cancel(CancellationEvent),
    Trade(Trade),
}

impl L3Entry {
    /// Compact serialized form: placements keep the full record, cancels and
    /// trades use the short-key forms.
    pub fn json_value(&self) -> Value {
        match self {
            Self::Place(event) => event.json_value(),
            Self::Cancel(event) => event.cancellation.l3_value(),
            Self::Trade(trade) => trade.l3_value(),
        }
    }
}

impl Serialize for L3Entry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.json_value().serialize(serializer)
    }
}

/// The L3 record of one book: every placement, cancellation, and trade in
/// delivery order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct L3Record(pub Vec<L3Entry>);

impl L3Record {
    pub fn push(&mut self, entry: L3Entry) {
        self.0.push(entry);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &L3Entry> {
        self.0.iter()
    }
}

/// L3 records for every book of a block, serialized as a map keyed by the
/// stringified local book id.
#[derive(Debug, Clone, Default)]
pub struct L3RecordContainer {
    records: Vec<L3Record>,
}

impl L3RecordContainer {
    pub fn new(book_count: usize) -> Self {
        Self {
            records: vec![L3Record::default(); book_count],
        }
    }

    pub fn record(&self, book_idx: usize) -> Option<&L3Record> {
        self.records.get(book_idx)
    }

    pub fn record_mut(&mut self, book_idx: usize) -> Option<&mut L3Record> {
        self.records.get_mut(book_idx)
    }

    pub fn underlying(&self) -> &[L3Record] {
        &self.records
    }
}

impl Serialize for L3RecordContainer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.records.len()))?;
        for (book_id, record) in self.records.iter().enumerate() {
            map.serialize_entry(&book_id.to_string(), record)?;
        }
        map.end()
    }
}
