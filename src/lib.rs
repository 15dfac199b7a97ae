//! Post-mortem analysis of recorded allocation traces.
//!
//! An instrumentation layer inside the target program writes every
//! allocation, deallocation and reallocation, with its call stack, to a binary
//! trace. This crate replays such traces to find the blocks that were never
//! released, the peak amount of live memory, and the call sites responsible.

mod analyzer;
mod config;
mod error;
mod event;
mod export;
mod index;
mod objmap;
mod reader;
mod record;
mod reducer;
mod report;
mod stack;
mod stats;
#[cfg(test)]
mod testing;

use {
  byteorder::{ByteOrder, LittleEndian},
  memmap2::Mmap,
  pprof::protos::{Function, Line, Location, Profile, Sample, ValueType},
  prost::Message,
  record::Links,
  serde::{Serialize, Serializer, ser::SerializeStruct},
  std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap, btree_map},
    fmt::{self, Display, Formatter},
    fs::File,
    io::{self, Write},
    mem::size_of,
    path::{Path, PathBuf},
    sync::Arc,
  },
  tracing::{debug, info, trace},
};

pub use {
  analyzer::{Analyzer, AnalyzerBuilder},
  config::AnalyzerConfig,
  error::{ExportError, TraceError},
  event::{
    END_OF_TRACE, EventKind, FRAME_SIZE, HEADER_SIZE, RawEvent, RawFrames,
    TraceEvent,
  },
  export::build_pprof_profile,
  index::{AllocationIndex, IndexKey, IndexMode},
  objmap::{ObjectMap, Symbolizer},
  reader::EventReader,
  record::{
    AllocationRecord, BlockState, ErrorKind, ErrorRecord, RecordId, Site,
  },
  reducer::Reducer,
  report::{ErrorEntry, LeakEntry, LeakReport},
  stack::{CallStack, FrameDescriptor, StackIdentity},
  stats::{EventTotals, HeapExtent, Statistics},
};
