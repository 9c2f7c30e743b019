/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! `AutoPersistScheduler`: periodic + event-driven snapshotting to the
//! blob store. Registers DOM handlers in the `wasm` build; in a plain host
//! build (tests, or any non-browser embedding of this crate) there is no
//! `window`/`document` to hang handlers off, so only the periodic leg
//! runs, via a background task instead of `setInterval`.

use crate::lifecycle::DatabaseLifecycle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A periodic interval generous enough to bound snapshot staleness
/// without persisting on every mutation.
pub const PERSIST_INTERVAL: Duration = Duration::from_secs(30);

/// Disposer handle. Dropping it does *not* remove the handlers — call
/// [`AutoPersistScheduler::dispose`] explicitly, returning a disposer that
/// removes all handlers rather than an RAII guard, so a host can hold
/// onto the scheduler without tearing it down implicitly on an unrelated
/// drop.
pub struct AutoPersistScheduler {
    disposed: Arc<AtomicBool>,
    #[cfg(feature = "wasm")]
    wasm_handlers: wasm_impl::Handlers,
}

impl AutoPersistScheduler {
    /// Registers all handlers, unless `automated_test_mode` is set (to
    /// avoid heap pressure from repeated timers across a test run), in
    /// which case a disposer is still returned but it owns nothing.
    pub fn register(lifecycle: Arc<DatabaseLifecycle>, automated_test_mode: bool) -> Self {
        let disposed = Arc::new(AtomicBool::new(automated_test_mode));

        if !automated_test_mode {
            spawn_periodic_persist(lifecycle.clone(), disposed.clone());
        }

        #[cfg(feature = "wasm")]
        {
            let wasm_handlers = if automated_test_mode {
                wasm_impl::Handlers::default()
            } else {
                wasm_impl::install(lifecycle)
            };
            Self {
                disposed,
                wasm_handlers,
            }
        }
        #[cfg(not(feature = "wasm"))]
        {
            let _ = &lifecycle;
            Self { disposed }
        }
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        #[cfg(feature = "wasm")]
        self.wasm_handlers.remove_all();
    }
}

fn spawn_periodic_persist(lifecycle: Arc<DatabaseLifecycle>, disposed: Arc<AtomicBool>) {
    #[cfg(not(feature = "wasm"))]
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PERSIST_INTERVAL);
            loop {
                ticker.tick().await;
                if disposed.load(Ordering::SeqCst) {
                    return;
                }
                if let Err(e) = lifecycle.persist().await {
                    log::error!("periodic persist failed: {e}");
                }
            }
        });
    }
    #[cfg(feature = "wasm")]
    {
        wasm_bindgen_futures::spawn_local(async move {
            loop {
                window_timeout_sleep(PERSIST_INTERVAL).await;
                if disposed.load(Ordering::SeqCst) {
                    return;
                }
                if let Err(e) = lifecycle.persist().await {
                    log::error!("periodic persist failed: {e}");
                }
            }
        });
    }
}

#[cfg(feature = "wasm")]
async fn window_timeout_sleep(duration: Duration) {
    use wasm_bindgen::closure::Closure;
    use wasm_bindgen::JsCast;
    let promise = js_sys::Promise::new(&mut |resolve, _reject| {
        if let Some(window) = web_sys::window() {
            let cb = Closure::once(move || {
                let _ = resolve.call0(&wasm_bindgen::JsValue::NULL);
            });
            let _ = window.set_timeout_with_callback_and_timeout_and_arguments_0(
                cb.as_ref().unchecked_ref(),
                duration.as_millis() as i32,
            );
            cb.forget();
        }
    });
    let _ = wasm_bindgen_futures::JsFuture::from(promise).await;
}

#[cfg(feature = "wasm")]
mod wasm_impl {
    use super::*;
    use wasm_bindgen::closure::Closure;
    use wasm_bindgen::JsCast;
    use web_sys::{Event, VisibilityState};

    #[derive(Default)]
    pub struct Handlers {
        unload: Option<(web_sys::Window, Closure<dyn FnMut(Event)>)>,
        visibility: Option<(web_sys::Document, Closure<dyn FnMut(Event)>)>,
    }

    impl Handlers {
        pub fn remove_all(&self) {
            if let Some((window, closure)) = &self.unload {
                let _ = window.remove_event_listener_with_callback(
                    "beforeunload",
                    closure.as_ref().unchecked_ref(),
                );
            }
            if let Some((doc, closure)) = &self.visibility {
                let _ = doc.remove_event_listener_with_callback(
                    "visibilitychange",
                    closure.as_ref().unchecked_ref(),
                );
            }
        }
    }

    pub fn install(lifecycle: Arc<DatabaseLifecycle>) -> Handlers {
        let Some(window) = web_sys::window() else {
            return Handlers::default();
        };

        let unload_lifecycle = lifecycle.clone();
        let on_unload = Closure::wrap(Box::new(move |_event: Event| {
            let lifecycle = unload_lifecycle.clone();
            wasm_bindgen_futures::spawn_local(async move {
                if let Err(e) = lifecycle.persist().await {
                    log::error!("beforeunload persist failed: {e}");
                }
            });
        }) as Box<dyn FnMut(Event)>);
        let _ = window
            .add_event_listener_with_callback("beforeunload", on_unload.as_ref().unchecked_ref());

        let unload_entry = (window.clone(), on_unload);

        let visibility_entry = window.document().map(|doc| {
            let visibility_lifecycle = lifecycle;
            let doc_for_closure = doc.clone();
            let on_visibility = Closure::wrap(Box::new(move |_event: Event| {
                if doc_for_closure.visibility_state() == VisibilityState::Hidden {
                    let lifecycle = visibility_lifecycle.clone();
                    wasm_bindgen_futures::spawn_local(async move {
                        if let Err(e) = lifecycle.persist().await {
                            log::error!("visibilitychange persist failed: {e}");
                        }
                    });
                }
            }) as Box<dyn FnMut(Event)>);
            let _ = doc.add_event_listener_with_callback(
                "visibilitychange",
                on_visibility.as_ref().unchecked_ref(),
            );
            (doc, on_visibility)
        });

        Handlers {
            unload: Some(unload_entry),
            visibility: visibility_entry,
        }
    }
}

#[cfg(all(test, not(feature = "wasm")))]
mod tests {
    use super::*;
    use crate::lifecycle::HostConfig;

    #[tokio::test]
    async fn automated_test_mode_registers_no_periodic_task() {
        let lifecycle = Arc::new(DatabaseLifecycle::new(HostConfig {
            automated_test_mode: true,
            ..Default::default()
        }));
        let scheduler = AutoPersistScheduler::register(lifecycle, true);
        assert!(scheduler.disposed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dispose_stops_further_ticks() {
        let lifecycle = Arc::new(DatabaseLifecycle::new(HostConfig::default()));
        let scheduler = AutoPersistScheduler::register(lifecycle, false);
        scheduler.dispose();
        assert!(scheduler.disposed.load(Ordering::SeqCst));
    }
}
