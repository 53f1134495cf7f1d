#![no_main]
#[macro_use] extern crate libfuzzer_sys;
extern crate vp8rc;
use vp8rc::fuzzing::*;

fuzz_target!(|data: ArbitraryConfig| {
  let _ = pretty_env_logger::try_init();

  fuzz_construct_context(data)
});
