use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use test_support::mock::{set_thread_ctx, with_ctx};
use vmcore::{CtxMode, VmErr};

use super::{Gate, device_set};
use crate::{TaskFlags, TaskOwner};

const OWNER: TaskOwner = TaskOwner::Device(7);

#[test]
fn test_trigger_executes_callback() {
    let set = device_set();
    let ran = Arc::new(Gate::new());
    let ran_cb = ran.clone();
    let h = set
        .create(
            TaskFlags::empty(),
            "exec",
            OWNER,
            Box::new(move || ran_cb.signal()),
        )
        .unwrap();

    set.trigger(OWNER, h).unwrap();
    assert!(ran.wait_timeout(Duration::from_secs(5)), "callback never ran");
    set.destroy(OWNER, h).unwrap();
}

#[test]
fn test_triggers_coalesce() {
    let set = device_set();
    let count = Arc::new(AtomicU32::new(0));
    let started = Arc::new(Gate::new());
    let release = Arc::new(Gate::new());

    let (count_cb, started_cb, release_cb) = (count.clone(), started.clone(), release.clone());
    let h = set
        .create(
            TaskFlags::empty(),
            "coalesce",
            OWNER,
            Box::new(move || {
                count_cb.fetch_add(1, Ordering::AcqRel);
                started_cb.signal();
                release_cb.wait();
            }),
        )
        .unwrap();

    // 第一次执行悬在门闩上，期间的三次触发合并成一次后续执行
    set.trigger(OWNER, h).unwrap();
    started.wait();
    set.trigger(OWNER, h).unwrap();
    set.trigger(OWNER, h).unwrap();
    set.trigger(OWNER, h).unwrap();
    release.signal();

    started.wait();
    release.signal();

    // 没有第三次执行
    assert!(!started.wait_timeout(Duration::from_millis(100)));
    assert_eq!(count.load(Ordering::Acquire), 2);
    set.destroy(OWNER, h).unwrap();
}

#[test]
fn test_context_capability_enforced() {
    let set = device_set();
    let plain = set
        .create(TaskFlags::empty(), "plain", OWNER, Box::new(|| {}))
        .unwrap();
    let ring0 = set
        .create(TaskFlags::RING0, "ring0-ok", OWNER, Box::new(|| {}))
        .unwrap();

    // ring-3 触发恒许可
    set.trigger(OWNER, plain).unwrap();

    with_ctx(CtxMode::Ring0, || {
        assert_eq!(set.trigger(OWNER, plain), Err(VmErr::InvalidContext));
        set.trigger(OWNER, ring0).unwrap();
    });
    with_ctx(CtxMode::RawMode, || {
        // RING0 不蕴含 RAW_MODE
        assert_eq!(set.trigger(OWNER, ring0), Err(VmErr::InvalidContext));
    });
}

#[test]
fn test_owner_must_match() {
    let set = device_set();
    let h = set
        .create(TaskFlags::empty(), "owned", OWNER, Box::new(|| {}))
        .unwrap();

    assert_eq!(set.trigger(TaskOwner::Device(8), h), Err(VmErr::NotOwner));
    assert_eq!(set.destroy(TaskOwner::Device(8), h), Err(VmErr::NotOwner));
    set.destroy(OWNER, h).unwrap();
}

#[test]
fn test_destroy_waits_for_inflight_callback() {
    let set = Arc::new(device_set());
    let started = Arc::new(Gate::new());
    let release = Arc::new(Gate::new());

    let (started_cb, release_cb) = (started.clone(), release.clone());
    let h = set
        .create(
            TaskFlags::empty(),
            "inflight",
            OWNER,
            Box::new(move || {
                started_cb.signal();
                release_cb.wait();
            }),
        )
        .unwrap();

    set.trigger(OWNER, h).unwrap();
    started.wait();

    // 回调悬在门闩上，destroy 必须等它结束
    let done = Arc::new(AtomicBool::new(false));
    let (set2, done2) = (set.clone(), done.clone());
    let destroyer = std::thread::spawn(move || {
        set2.destroy(OWNER, h).unwrap();
        done2.store(true, Ordering::Release);
    });

    std::thread::sleep(Duration::from_millis(50));
    assert!(!done.load(Ordering::Acquire), "destroy returned mid-callback");

    release.signal();
    destroyer.join().unwrap();
    assert!(done.load(Ordering::Acquire));
    assert_eq!(set.trigger(OWNER, h), Err(VmErr::NotFound));
}

#[test]
fn test_destroy_all_by_owner() {
    let set = device_set();
    let other = TaskOwner::Device(99);
    let a = set
        .create(TaskFlags::empty(), "a", OWNER, Box::new(|| {}))
        .unwrap();
    let b = set
        .create(TaskFlags::empty(), "b", OWNER, Box::new(|| {}))
        .unwrap();
    let c = set
        .create(TaskFlags::empty(), "c", other, Box::new(|| {}))
        .unwrap();

    assert_eq!(set.destroy_all_by_owner(OWNER), Ok(2));
    assert_eq!(set.trigger(OWNER, a), Err(VmErr::NotFound));
    assert_eq!(set.trigger(OWNER, b), Err(VmErr::NotFound));
    set.trigger(other, c).unwrap();
    assert_eq!(set.destroy_all_by_owner(OWNER), Ok(0));
}

#[test]
fn test_create_and_destroy_are_ring3_only() {
    let set = device_set();
    let h = set
        .create(TaskFlags::empty(), "r3", OWNER, Box::new(|| {}))
        .unwrap();

    let res = std::thread::spawn(move || {
        set_thread_ctx(CtxMode::Ring0);
        let set = device_set();
        set.create(TaskFlags::empty(), "nope", OWNER, Box::new(|| {}))
            .map(|_| ())
    })
    .join()
    .unwrap();
    assert_eq!(res, Err(VmErr::InvalidContext));

    with_ctx(CtxMode::Ring0, || {
        assert_eq!(set.destroy(OWNER, h), Err(VmErr::InvalidContext));
        assert_eq!(set.destroy_all_by_owner(OWNER), Err(VmErr::InvalidContext));
    });
    set.destroy(OWNER, h).unwrap();
}
