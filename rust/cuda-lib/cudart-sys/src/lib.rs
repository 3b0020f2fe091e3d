#![allow(warnings)]
include!(concat!(env!("OUT_DIR"), "/cudart-bindings.rs"));
