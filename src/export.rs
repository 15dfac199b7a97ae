use super::*;

struct StringTable {
  entries: Vec<String>,
  index: HashMap<String, i64>,
}

impl StringTable {
  fn intern(&mut self, value: &str) -> i64 {
    if let Some(index) = self.index.get(value) {
      return *index;
    }

    let index = i64::try_from(self.entries.len()).unwrap_or(i64::MAX);

    self.entries.push(value.to_string());
    self.index.insert(value.to_string(), index);

    index
  }

  fn into_vec(self) -> Vec<String> {
    self.entries
  }

  fn new() -> Self {
    Self {
      entries: vec![String::new()],
      index: HashMap::from([(String::new(), 0)]),
    }
  }
}

/// Build a pprof heap profile with one sample per leak.
///
/// Each frame address becomes a location. Resolved frames also carry a
/// function named after their symbol.
#[must_use]
pub fn build_pprof_profile(report: &LeakReport) -> Profile {
  let mut string_table = StringTable::new();

  let mut functions = Vec::new();
  let mut locations = Vec::new();
  let mut samples = Vec::new();

  let space_type = ValueType {
    ty: string_table.intern("space"),
    unit: string_table.intern("bytes"),
  };

  let count_type = ValueType {
    ty: string_table.intern("objects"),
    unit: string_table.intern("count"),
  };

  let mut function_ids: HashMap<(i64, i64), u64> = HashMap::new();
  let mut location_ids: HashMap<u64, u64> = HashMap::new();

  for leak in report.leaks() {
    let mut stack_location_ids = Vec::with_capacity(leak.frames.len().max(1));

    let site_frame = [FrameDescriptor::new(leak.site)];
    let frames = if leak.frames.is_empty() {
      &site_frame[..]
    } else {
      &leak.frames[..]
    };

    for frame in frames {
      if let Some(id) = location_ids.get(&frame.address) {
        stack_location_ids.push(*id);
        continue;
      }

      let mut lines = Vec::new();
      if let Some(symbol) = &frame.symbol {
        let name = string_table.intern(symbol);
        let filename = string_table.intern(frame.file.as_deref().unwrap_or(""));

        let next_function_id = functions.len() as u64 + 1;
        let function_id =
          *function_ids.entry((name, filename)).or_insert_with(|| {
            functions.push(Function {
              id: next_function_id,
              name,
              system_name: name,
              filename,
              start_line: 0,
            });
            next_function_id
          });

        lines.push(Line {
          function_id,
          line: 0,
        });
      }

      let location_id = locations.len() as u64 + 1;
      locations.push(Location {
        id: location_id,
        mapping_id: 0,
        address: frame.address,
        line: lines,
        is_folded: false,
      });
      location_ids.insert(frame.address, location_id);
      stack_location_ids.push(location_id);
    }

    samples.push(Sample {
      location_id: stack_location_ids,
      value: vec![
        i64::try_from(leak.size).unwrap_or(i64::MAX),
        i64::try_from(leak.occurrences).unwrap_or(i64::MAX),
      ],
      label: Vec::new(),
    });
  }

  Profile {
    sample_type: vec![space_type, count_type],
    sample: samples,
    mapping: Vec::new(),
    location: locations,
    function: functions,
    string_table: string_table.into_vec(),
    drop_frames: 0,
    keep_frames: 0,
    time_nanos: 0,
    duration_nanos: 0,
    period_type: Some(ValueType { ty: 0, unit: 0 }),
    period: 1,
    comment: Vec::new(),
    default_sample_type: 0,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::stack;

  fn report(
    events: Vec<TraceEvent>,
    objects: Option<&ObjectMap>,
  ) -> LeakReport {
    let mut analyzer = Analyzer::new();
    for event in events {
      analyzer.record_event(event);
    }
    match objects {
      Some(objects) => analyzer.report_with(objects),
      None => analyzer.report(),
    }
  }

  #[test]
  fn one_sample_per_leak_with_shared_locations() {
    let profile = build_pprof_profile(&report(
      vec![
        TraceEvent::allocation(0x10, 8, stack(&[0x1, 0x2])),
        TraceEvent::allocation(0x20, 24, stack(&[0x3, 0x2])),
      ],
      None,
    ));

    assert_eq!(profile.sample.len(), 2);
    assert_eq!(profile.location.len(), 3);
    assert!(profile.function.is_empty());
    assert_eq!(profile.sample[0].value, vec![8, 1]);
    assert_eq!(profile.sample[1].value, vec![24, 1]);
    assert_eq!(
      profile.sample[0].location_id[1],
      profile.sample[1].location_id[1]
    );
  }

  #[test]
  fn resolved_frames_get_functions() {
    let mut objects = ObjectMap::new();
    objects.insert(0x0, "/bin/app");

    let profile = build_pprof_profile(&report(
      vec![TraceEvent::allocation(0x10, 8, stack(&[0x1, 0x2]))],
      Some(&objects),
    ));

    assert_eq!(profile.function.len(), 2);
    let name = profile.function[0].name as usize;
    assert_eq!(profile.string_table[name], "app+0x1");
    assert_eq!(profile.location[0].line[0].function_id, 1);
  }

  #[test]
  fn stackless_leak_uses_site_address() {
    let profile = build_pprof_profile(&report(
      vec![TraceEvent::allocation(0x10, 8, CallStack::default())],
      None,
    ));

    assert_eq!(profile.location.len(), 1);
    assert_eq!(profile.location[0].address, 0);
  }

  #[test]
  fn pprof_export_writes_encoded_profile() {
    let leaks = report(
      vec![TraceEvent::allocation(0x10, 8, stack(&[0x1]))],
      None,
    );

    let mut out = Vec::new();
    leaks.export_pprof(&mut out).expect("export pprof");
    let decoded = Profile::decode(out.as_slice()).expect("decode profile");
    assert_eq!(decoded.sample.len(), 1);
  }
}
