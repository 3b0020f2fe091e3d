use std::collections::VecDeque;

use crate::{
    error::CollNetError,
    utils::pending::{PostOutcome, drain},
};

#[test]
fn drain_removes_posted_in_order() {
    let mut queue: VecDeque<u32> = (0..4).collect();
    let mut retried = Vec::new();
    drain(&mut queue, |req| {
        retried.push(req);
        Ok(PostOutcome::Posted)
    })
    .unwrap();
    assert!(queue.is_empty());
    assert_eq!(retried, vec![0, 1, 2, 3]);
}

#[test]
fn refused_head_stays_and_stops_drain() {
    let mut queue: VecDeque<u32> = (0..4).collect();
    let mut retried = Vec::new();
    drain(&mut queue, |req| {
        retried.push(req);
        if req < 2 {
            Ok(PostOutcome::Posted)
        } else {
            Ok(PostOutcome::Again)
        }
    })
    .unwrap();
    // Queue only shrinks; a refusal keeps the request at the front and
    // nothing behind it is touched.
    assert_eq!(queue, VecDeque::from(vec![2, 3]));
    assert_eq!(retried, vec![0, 1, 2]);
}

#[test]
fn errors_surface_with_request_still_queued() {
    let mut queue: VecDeque<u32> = (0..3).collect();
    let err = drain(&mut queue, |req| {
        if req == 1 {
            Err(CollNetError::Protocol("boom"))
        } else {
            Ok(PostOutcome::Posted)
        }
    });
    assert!(err.is_err());
    assert_eq!(queue, VecDeque::from(vec![1, 2]));
}
