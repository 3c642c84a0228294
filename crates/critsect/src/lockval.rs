//! 锁序校验器
//!
//! 原语自身不保证跨锁的全局获取顺序，顺序由调用方约定；严格/调试
//! 构建负责**记录**获取调用点并对照历史上观测到的类对顺序，把违反
//! 约定的获取暴露出来。这里只实现该合同的采集侧：调用点与类标签被
//! 捕获并可枚举，分析/报告方式不在范围内。
//!
//! 每个 VM 一个校验器实例（挂在 [`CritSectRegistry`]），持锁栈按
//! 线程记录，条目携带校验器身份，避免同进程内多 VM 互相污染。
//!
//! [`CritSectRegistry`]: crate::CritSectRegistry

use core::panic::Location;
use std::cell::RefCell;
use std::sync::Mutex;

use hashbrown::HashMap;
use vmlog::vm_warn;

/// 编译期解析：debug 构建或 `strict` feature 下启用
pub(crate) const LOCKVAL_ENABLED: bool = cfg!(debug_assertions) || cfg!(feature = "strict");

/// 锁校验类 id（按节名分配）
pub(crate) type ClassId = u32;

/// 一次锁序违规的记录
#[derive(Debug, Clone)]
pub struct Violation {
    /// 违规获取发生时已持有的锁类名
    pub held: String,
    /// 被违规获取的锁类名
    pub acquired: String,
    /// 违规获取的调用点文件
    pub file: &'static str,
    /// 违规获取的调用点行号
    pub line: u32,
}

struct ValState {
    /// 类 id → 类名
    names: Vec<String>,
    by_name: HashMap<String, ClassId>,
    /// 已观测到的 (先持, 后取) 类对
    order: HashMap<(ClassId, ClassId), ()>,
    violations: Vec<Violation>,
}

/// 锁序校验器（VM 作用域）
pub struct LockValidator {
    state: Mutex<ValState>,
}

thread_local! {
    /// 当前线程持锁栈：（校验器身份, 类 id）
    static HELD: RefCell<Vec<(usize, ClassId)>> = const { RefCell::new(Vec::new()) };
}

impl LockValidator {
    pub(crate) fn new() -> Self {
        LockValidator {
            state: Mutex::new(ValState {
                names: Vec::new(),
                by_name: HashMap::new(),
                order: HashMap::new(),
                violations: Vec::new(),
            }),
        }
    }

    /// 按节名惰性分配类 id
    pub(crate) fn class_for(&self, name: &str) -> ClassId {
        let mut st = self.state.lock().unwrap();
        if let Some(&id) = st.by_name.get(name) {
            return id;
        }
        let id = st.names.len() as ClassId;
        st.names.push(name.to_string());
        st.by_name.insert(name.to_string(), id);
        id
    }

    fn key(&self) -> usize {
        self as *const LockValidator as usize
    }

    /// 记录一次首层获取并对照历史顺序
    pub(crate) fn on_acquire(&self, class: ClassId, pos: &'static Location<'static>) {
        if !LOCKVAL_ENABLED {
            return;
        }
        let key = self.key();
        let held: Vec<ClassId> = HELD.with(|h| {
            h.borrow()
                .iter()
                .filter(|&&(k, _)| k == key)
                .map(|&(_, c)| c)
                .collect()
        });
        let mut st = self.state.lock().unwrap();
        for h in held {
            if h == class {
                continue;
            }
            if st.order.contains_key(&(class, h)) {
                // 曾观测到 class 先于 h；现在持着 h 再取 class，顺序反了
                let v = Violation {
                    held: st.names[h as usize].clone(),
                    acquired: st.names[class as usize].clone(),
                    file: pos.file(),
                    line: pos.line(),
                };
                vm_warn!(
                    "lockval: 持有 '{}' 时获取 '{}'，与历史顺序相反 ({}:{})",
                    v.held,
                    v.acquired,
                    v.file,
                    v.line
                );
                st.violations.push(v);
            } else {
                st.order.insert((h, class), ());
            }
        }
        drop(st);
        HELD.with(|h| h.borrow_mut().push((key, class)));
    }

    /// 首层释放时出栈
    pub(crate) fn on_release(&self, class: ClassId) {
        if !LOCKVAL_ENABLED {
            return;
        }
        let key = self.key();
        HELD.with(|h| {
            let mut stack = h.borrow_mut();
            if let Some(i) = stack.iter().rposition(|&(k, c)| k == key && c == class) {
                stack.remove(i);
            }
        });
    }

    /// 已记录的违规列表
    pub fn violations(&self) -> Vec<Violation> {
        self.state.lock().unwrap().violations.clone()
    }
}
