use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use test_support::mock::set_thread_ctx;
use vmcore::{CtxMode, VmErr};

use super::registry;

#[test]
fn test_concurrent_readers() {
    let reg = registry();
    let rw = reg.create_rw("readers").unwrap();

    rw.enter_shared(VmErr::Ring3Retry).unwrap();
    let rw2 = rw.clone();
    let res = std::thread::spawn(move || {
        rw2.enter_shared(VmErr::Ring3Retry)?;
        let n = rw2.read_count();
        rw2.leave_shared()?;
        Ok::<u32, VmErr>(n)
    })
    .join()
    .unwrap();
    assert_eq!(res, Ok(2));
    assert_eq!(rw.read_count(), 1);
    rw.leave_shared().unwrap();
    assert_eq!(rw.read_count(), 0);
}

#[test]
fn test_writer_excludes_readers_and_writers() {
    let reg = registry();
    let rw = reg.create_rw("excl").unwrap();

    rw.enter_excl(VmErr::Ring3Retry).unwrap();
    assert!(rw.is_write_owner());

    let rw2 = rw.clone();
    let res = std::thread::spawn(move || {
        (
            rw2.try_enter_shared().err(),
            rw2.try_enter_excl().err(),
            rw2.is_write_owner(),
        )
    })
    .join()
    .unwrap();
    assert_eq!(res, (Some(VmErr::SemBusy), Some(VmErr::SemBusy), false));

    rw.leave_excl().unwrap();
    assert!(!rw.is_write_owner());
}

#[test]
fn test_writer_recursion() {
    let reg = registry();
    let rw = reg.create_rw("w-recursion").unwrap();

    rw.enter_excl(VmErr::Ring3Retry).unwrap();
    rw.enter_excl(VmErr::Ring3Retry).unwrap();
    rw.try_enter_excl().unwrap();
    assert_eq!(rw.write_recursion(), 3);
    rw.leave_excl().unwrap();
    rw.leave_excl().unwrap();
    assert_eq!(rw.write_recursion(), 1);
    rw.leave_excl().unwrap();
    assert_eq!(rw.write_recursion(), 0);
    assert_eq!(rw.leave_excl(), Err(VmErr::NotOwner));
}

#[test]
fn test_writer_implicit_read() {
    let reg = registry();
    let rw = reg.create_rw("implicit-read").unwrap();

    rw.enter_excl(VmErr::Ring3Retry).unwrap();
    assert!(!rw.is_read_owner(true));

    // 写者的读进入不动全局读者数
    rw.enter_shared(VmErr::Ring3Retry).unwrap();
    rw.try_enter_shared().unwrap();
    assert_eq!(rw.read_count(), 0);
    assert_eq!(rw.writer_read_recursion(), 2);
    assert!(rw.is_read_owner(false));

    // 隐式读未退绕时不得放掉写锁
    assert_eq!(rw.leave_excl(), Err(VmErr::WrongOrder));

    rw.leave_shared().unwrap();
    rw.leave_shared().unwrap();
    assert_eq!(rw.leave_shared(), Err(VmErr::NotOwner));
    rw.leave_excl().unwrap();
}

#[test]
fn test_busy_contract_shared_and_excl() {
    let reg = registry();
    let rw = reg.create_rw("rw-busy").unwrap();
    rw.enter_excl(VmErr::Ring3Retry).unwrap();

    let rw2 = rw.clone();
    let res = std::thread::spawn(move || {
        set_thread_ctx(CtxMode::Ring0);
        (
            rw2.enter_shared(VmErr::NoResources),
            rw2.enter_excl(VmErr::NotFound),
        )
    })
    .join()
    .unwrap();
    assert_eq!(res, (Err(VmErr::NoResources), Err(VmErr::NotFound)));

    rw.leave_excl().unwrap();
}

#[test]
fn test_readers_blocked_while_writer_waits() {
    let reg = registry();
    let rw = reg.create_rw("no-starvation").unwrap();

    rw.enter_shared(VmErr::Ring3Retry).unwrap();

    // 写者在读者在场时登记等待
    let rw_w = rw.clone();
    let writer = std::thread::spawn(move || {
        rw_w.enter_excl(VmErr::Ring3Retry).unwrap();
        let owned = rw_w.is_write_owner();
        rw_w.leave_excl().unwrap();
        owned
    });

    // 一旦写者登记，新读者不再放行
    let mut spins = 0;
    loop {
        let rw_r = rw.clone();
        let probe = std::thread::spawn(move || match rw_r.try_enter_shared() {
            Ok(()) => {
                rw_r.leave_shared().unwrap();
                false
            }
            Err(VmErr::SemBusy) => true,
            Err(e) => panic!("unexpected {e:?}"),
        })
        .join()
        .unwrap();
        if probe {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
        spins += 1;
        assert!(spins < 5000, "writer never registered as waiting");
    }

    // 放掉读锁，写者得以进入并退出
    rw.leave_shared().unwrap();
    assert!(writer.join().unwrap());

    // 写者走后读者恢复放行
    rw.enter_shared(VmErr::Ring3Retry).unwrap();
    rw.leave_shared().unwrap();
}

#[test]
fn test_writer_wakes_after_last_reader() {
    let reg = registry();
    let rw = reg.create_rw("handoff").unwrap();
    let order = Arc::new(AtomicU32::new(0));

    rw.enter_shared(VmErr::Ring3Retry).unwrap();
    let rw2 = rw.clone();
    rw2.enter_shared(VmErr::Ring3Retry).unwrap();

    let rw_w = rw.clone();
    let order_w = order.clone();
    let writer = std::thread::spawn(move || {
        rw_w.enter_excl(VmErr::Ring3Retry).unwrap();
        // 两个读者都必须已经退出
        assert_eq!(order_w.load(Ordering::Acquire), 2);
        rw_w.leave_excl().unwrap();
    });

    // 等写者登记
    let mut spins = 0;
    while rw.try_enter_shared().is_ok() {
        rw.leave_shared().unwrap();
        std::thread::sleep(Duration::from_millis(1));
        spins += 1;
        assert!(spins < 5000, "writer never registered as waiting");
    }

    order.fetch_add(1, Ordering::AcqRel);
    rw.leave_shared().unwrap();
    std::thread::sleep(Duration::from_millis(5));
    order.fetch_add(1, Ordering::AcqRel);
    rw2.leave_shared().unwrap();
    writer.join().unwrap();
}

#[test]
fn test_leave_without_enter_rejected() {
    let reg = registry();
    let rw = reg.create_rw("rw-unowned").unwrap();
    assert_eq!(rw.leave_shared(), Err(VmErr::NotOwner));
    assert_eq!(rw.leave_excl(), Err(VmErr::NotOwner));
}

#[test]
fn test_is_read_owner_reporting() {
    let reg = registry();
    let rw = reg.create_rw("read-owner").unwrap();

    // 没有任何读者：确定性 false
    assert!(!rw.is_read_owner(true));

    // 自己是读者之一但没有按线程登记：只能回答 wanna_hear
    rw.enter_shared(VmErr::Ring3Retry).unwrap();
    assert!(rw.is_read_owner(true));
    assert!(!rw.is_read_owner(false));
    rw.leave_shared().unwrap();
}

#[test]
fn test_delete_lifecycle() {
    let reg = registry();
    let rw = reg.create_rw("rw-delete").unwrap();

    rw.enter_shared(VmErr::Ring3Retry).unwrap();
    assert_eq!(rw.delete(), Err(VmErr::SemBusy));
    rw.leave_shared().unwrap();

    rw.enter_excl(VmErr::Ring3Retry).unwrap();
    assert_eq!(rw.delete(), Err(VmErr::SemBusy));
    rw.leave_excl().unwrap();

    assert!(rw.is_initialized());
    rw.delete().unwrap();
    assert!(!rw.is_initialized());
    assert_eq!(rw.enter_shared(VmErr::Ring3Retry), Err(VmErr::WrongState));
    assert_eq!(rw.enter_excl(VmErr::Ring3Retry), Err(VmErr::WrongState));
    rw.delete().unwrap();
}
