use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// 订阅回调。监听器在每次 set 时按订阅顺序同步调用。
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

struct StoreInner<T> {
    value: Mutex<T>,
    listeners: Mutex<Vec<(u64, Listener<T>)>>,
    next_id: AtomicU64,
}

/// 响应式状态容器
///
/// `get()` / `set()` / `update()` / `subscribe()`。`subscribe` 先立即投递当前值，
/// 之后投递每一个新值；返回的句柄是显式的订阅对象，取消订阅是确定性的，
/// 不会有闭包被隐式捕获到容器生命周期结束。
pub struct Store<T> {
    inner: Arc<StoreInner<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Store<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                value: Mutex::new(initial),
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn get(&self) -> T {
        self.inner.value.lock().expect("store poisoned").clone()
    }

    pub fn set(&self, value: T) {
        {
            let mut guard = self.inner.value.lock().expect("store poisoned");
            *guard = value.clone();
        }
        // 锁外通知：监听器里允许再调用 get()/set()
        self.notify(&value);
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let value = {
            let mut guard = self.inner.value.lock().expect("store poisoned");
            f(&mut guard);
            guard.clone()
        };
        self.notify(&value);
    }

    /// 订阅变更。立即以当前值调用一次 listener，之后每次 set 都会调用。
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionHandle<T> {
        let listener: Listener<T> = Arc::new(listener);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut listeners = self.inner.listeners.lock().expect("store poisoned");
            listeners.push((id, Arc::clone(&listener)));
        }
        let current = self.get();
        listener(&current);
        SubscriptionHandle {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().expect("store poisoned").len()
    }

    fn notify(&self, value: &T) {
        // 先快照再调用，避免监听器内 subscribe/unsubscribe 时持锁
        let snapshot: Vec<Listener<T>> = {
            let listeners = self.inner.listeners.lock().expect("store poisoned");
            listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in snapshot {
            listener(value);
        }
    }
}

/// 显式订阅句柄。调用 `unsubscribe` 后监听器立即移除。
///
/// 注意：仅 drop 句柄不会取消订阅，生命周期归注册方负责显式拆除。
pub struct SubscriptionHandle<T> {
    id: u64,
    inner: Weak<StoreInner<T>>,
}

impl<T> SubscriptionHandle<T> {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut listeners = inner.listeners.lock().expect("store poisoned");
            listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

/// 派生容器的源订阅守卫（类型擦除，便于统一持有）
pub trait SubscriptionGuard: Send + Sync {}
impl<T: Send + Sync> SubscriptionGuard for SubscriptionHandle<T> {}

/// 派生容器：由一个或多个源容器计算而来，对外只读。
pub struct Derived<T> {
    store: Store<T>,
    _sources: Vec<Box<dyn SubscriptionGuard>>,
}

impl<T: Clone + Send + Sync + 'static> Derived<T> {
    pub fn get(&self) -> T {
        self.store.get()
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionHandle<T> {
        self.store.subscribe(listener)
    }
}

/// 由两个源容器派生。任一源变更即重算。
pub fn derive2<A, B, T, F>(a: &Store<A>, b: &Store<B>, f: F) -> Derived<T>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    F: Fn(&A, &B) -> T + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let out = Store::new(f(&a.get(), &b.get()));
    let mut sources: Vec<Box<dyn SubscriptionGuard>> = Vec::new();

    {
        let (f, b, out) = (Arc::clone(&f), b.clone(), out.clone());
        sources.push(Box::new(a.subscribe(move |av| out.set(f(av, &b.get())))));
    }
    {
        let (f, a, out) = (Arc::clone(&f), a.clone(), out.clone());
        sources.push(Box::new(b.subscribe(move |bv| out.set(f(&a.get(), bv)))));
    }

    Derived {
        store: out,
        _sources: sources,
    }
}

/// 由三个源容器派生
pub fn derive3<A, B, C, T, F>(a: &Store<A>, b: &Store<B>, c: &Store<C>, f: F) -> Derived<T>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    F: Fn(&A, &B, &C) -> T + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let out = Store::new(f(&a.get(), &b.get(), &c.get()));
    let mut sources: Vec<Box<dyn SubscriptionGuard>> = Vec::new();

    {
        let (f, b, c, out) = (Arc::clone(&f), b.clone(), c.clone(), out.clone());
        sources.push(Box::new(
            a.subscribe(move |av| out.set(f(av, &b.get(), &c.get()))),
        ));
    }
    {
        let (f, a, c, out) = (Arc::clone(&f), a.clone(), c.clone(), out.clone());
        sources.push(Box::new(
            b.subscribe(move |bv| out.set(f(&a.get(), bv, &c.get()))),
        ));
    }
    {
        let (f, a, b, out) = (Arc::clone(&f), a.clone(), b.clone(), out.clone());
        sources.push(Box::new(
            c.subscribe(move |cv| out.set(f(&a.get(), &b.get(), cv))),
        ));
    }

    Derived {
        store: out,
        _sources: sources,
    }
}
