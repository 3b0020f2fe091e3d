#![allow(warnings)]
include!(concat!(env!("OUT_DIR"), "/gdrapi-bindings.rs"));
