use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use hicore::data::event::Event;
use rayon::prelude::*;
use thiserror::Error;

use crate::data::utility::{zstd_compress, zstd_decompress};

/// File magic of the event container format.
pub const DATASET_MAGIC: [u8; 4] = *b"HIEV";
/// Current container format version.
pub const FORMAT_VERSION: u32 = 1;

const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("not an event dataset, bad magic")]
    BadMagic,
    #[error("unsupported dataset format version {0}")]
    UnsupportedVersion(u32),
    #[error("event index {index} out of range, dataset holds {count} events")]
    EventOutOfRange { index: u64, count: u64 },
    #[error("truncated dataset: {0}")]
    Truncated(String),
}

/// Read access to a dataset of events.
///
/// Implemented by the on-disk handle and by in-memory datasets used in
/// tests; the event-loop driver only depends on this trait.
pub trait EventData {
    /// Get an event by its zero-based index
    fn get_event(&self, index: u64) -> Result<Event, DatasetError>;
    /// Get total number of events in the dataset
    fn event_count(&self) -> u64;
    /// Get the path to the data
    fn data_path(&self) -> &str;
}

/// Writes events into the `.hiev` container format.
///
/// Layout: magic, format version (u32 LE), event count (u64 LE), then per
/// event one u32 LE block length followed by the zstd-compressed bincode
/// encoding of the event.
pub struct EventDatasetWriter;

impl EventDatasetWriter {
    pub fn write<P: AsRef<Path>>(path: P, events: &[Event]) -> Result<(), DatasetError> {
        let mut file = File::create(path)?;
        file.write_all(&DATASET_MAGIC)?;
        file.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        file.write_u64::<LittleEndian>(events.len() as u64)?;

        for event in events {
            let encoded = bincode::encode_to_vec(event, bincode::config::standard())?;
            let compressed = zstd_compress(&encoded, COMPRESSION_LEVEL)?;
            file.write_u32::<LittleEndian>(compressed.len() as u32)?;
            file.write_all(&compressed)?;
        }
        Ok(())
    }
}

/// Memory-resident handle over one `.hiev` file.
///
/// The whole file is read at open time and per-event blocks are indexed,
/// so event access decompresses exactly one block.
pub struct EventDataHandle {
    pub data_path: String,
    buffer: Vec<u8>,
    blocks: Vec<(usize, usize)>,
}

impl EventDataHandle {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatasetError> {
        let data_path = path.as_ref().display().to_string();
        let mut buffer = Vec::new();
        File::open(path)?.read_to_end(&mut buffer)?;

        let mut cursor = Cursor::new(&buffer);
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if magic != DATASET_MAGIC {
            return Err(DatasetError::BadMagic);
        }
        let version = cursor.read_u32::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(DatasetError::UnsupportedVersion(version));
        }
        let count = cursor.read_u64::<LittleEndian>()?;

        let mut blocks = Vec::with_capacity(count as usize);
        for index in 0..count {
            let len = cursor
                .read_u32::<LittleEndian>()
                .map_err(|_| DatasetError::Truncated(format!("block header {}", index)))?
                as usize;
            let start = cursor.position() as usize;
            if start + len > buffer.len() {
                return Err(DatasetError::Truncated(format!("block {}", index)));
            }
            blocks.push((start, len));
            cursor.set_position((start + len) as u64);
        }

        Ok(EventDataHandle { data_path, buffer, blocks })
    }

    /// Get a collection of events by their indices, decoded in parallel
    pub fn get_events(&self, indices: &[u64]) -> Result<Vec<Event>, DatasetError> {
        indices.par_iter().map(|&i| self.get_event(i)).collect()
    }

    /// Sequential iterator over all events in the dataset
    pub fn events(&self) -> impl Iterator<Item = Result<Event, DatasetError>> + '_ {
        (0..self.event_count()).map(move |i| self.get_event(i))
    }
}

impl EventData for EventDataHandle {
    fn get_event(&self, index: u64) -> Result<Event, DatasetError> {
        let count = self.event_count();
        let (start, len) = *self
            .blocks
            .get(index as usize)
            .ok_or(DatasetError::EventOutOfRange { index, count })?;
        let decompressed = zstd_decompress(&self.buffer[start..start + len])?;
        let (event, _) = bincode::decode_from_slice(&decompressed, bincode::config::standard())?;
        Ok(event)
    }

    fn event_count(&self) -> u64 {
        self.blocks.len() as u64
    }

    fn data_path(&self) -> &str {
        &self.data_path
    }
}

/// In-memory dataset, mainly for tests and small synthetic runs.
pub struct InMemoryEventData {
    pub events: Vec<Event>,
}

impl InMemoryEventData {
    pub fn new(events: Vec<Event>) -> Self {
        InMemoryEventData { events }
    }
}

impl EventData for InMemoryEventData {
    fn get_event(&self, index: u64) -> Result<Event, DatasetError> {
        self.events
            .get(index as usize)
            .cloned()
            .ok_or(DatasetError::EventOutOfRange { index, count: self.events.len() as u64 })
    }

    fn event_count(&self) -> u64 {
        self.events.len() as u64
    }

    fn data_path(&self) -> &str {
        "<memory>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hicore::sim::generator::{EventGenerator, GeneratorConfig};

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("hiev_test_{}_{}", std::process::id(), name));
        path
    }

    #[test]
    fn test_container_round_trip() {
        let mut gen = EventGenerator::new(GeneratorConfig::default(), 11);
        let events = gen.generate_run(25);
        let path = temp_path("round_trip.hiev");

        EventDatasetWriter::write(&path, &events).unwrap();
        let handle = EventDataHandle::open(&path).unwrap();
        assert_eq!(handle.event_count(), 25);

        for (i, original) in events.iter().enumerate() {
            let restored = handle.get_event(i as u64).unwrap();
            assert_eq!(restored.info.event_number, original.info.event_number);
            assert_eq!(restored.clusters.len(), original.clusters.len());
            assert_eq!(restored.calo_sums.fcal_et_tev(), original.calo_sums.fcal_et_tev());
        }

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_parallel_read_matches_sequential() {
        let mut gen = EventGenerator::new(GeneratorConfig::default(), 5);
        let events = gen.generate_run(10);
        let path = temp_path("parallel.hiev");
        EventDatasetWriter::write(&path, &events).unwrap();

        let handle = EventDataHandle::open(&path).unwrap();
        let indices: Vec<u64> = (0..10).collect();
        let batch = handle.get_events(&indices).unwrap();
        for (i, event) in batch.iter().enumerate() {
            assert_eq!(event.info.event_number, events[i].info.event_number);
        }

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let path = temp_path("bad_magic.hiev");
        std::fs::write(&path, b"ROOTnope").unwrap();
        assert!(matches!(EventDataHandle::open(&path), Err(DatasetError::BadMagic)));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_out_of_range_index() {
        let mut gen = EventGenerator::new(GeneratorConfig::default(), 2);
        let events = gen.generate_run(3);
        let path = temp_path("range.hiev");
        EventDatasetWriter::write(&path, &events).unwrap();

        let handle = EventDataHandle::open(&path).unwrap();
        assert!(matches!(
            handle.get_event(3),
            Err(DatasetError::EventOutOfRange { index: 3, count: 3 })
        ));

        std::fs::remove_file(&path).unwrap();
    }
}
