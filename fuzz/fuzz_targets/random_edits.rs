#![no_main]

mod common;

use std::mem;

use libfuzzer_sys::fuzz_target;

use crate::common::{
  apply_edit,
  check_mapping,
  session_from_bytes,
};

fuzz_target!(|data: &[u8]| {
  let mut session = session_from_bytes(data);

  for (index, op) in mem::take(&mut session.ops).into_iter().enumerate() {
    apply_edit(&mut session.map, op);
    if index % 8 == 0 {
      check_mapping(&mut session.map, 128);
    }
  }
  check_mapping(&mut session.map, 1024);
});
