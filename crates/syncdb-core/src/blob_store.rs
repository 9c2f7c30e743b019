/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! `PersistentBlobStore`: a versioned key→bytes store backed by a single
//! named IndexedDB database with one object store, with a plain in-memory
//! fallback for hosts without a DOM (tests, and any native build of this
//! crate).

use crate::error::{Error, Result};
use std::time::Duration;

/// Default per-operation timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const DB_NAME: &str = "syncdb_blob_store";
const OBJECT_STORE_NAME: &str = "blobs";

/// `save`/`load`/`delete` over opaque byte blobs, each independently
/// timeout- and blocked-open-guarded. `load` returns `Ok(None)` for an
/// absent key, never an error.
///
/// Native builds require `Send` futures here (the periodic leg of
/// [`crate::auto_persist::AutoPersistScheduler`] runs inside `tokio::spawn`,
/// which demands it); the `wasm` build opts out, since `web-sys`/`JsValue`
/// types backing the real IndexedDB calls are not `Send` and its scheduling
/// goes through `wasm_bindgen_futures::spawn_local` instead, which doesn't
/// require it.
#[cfg_attr(not(feature = "wasm"), async_trait::async_trait)]
#[cfg_attr(feature = "wasm", async_trait::async_trait(?Send))]
pub trait BlobStore {
    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<()>;
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// The store actually wired into `DatabaseLifecycle`. Dispatches to a real
/// IndexedDB-backed implementation in the `wasm` build, and to an in-memory
/// stand-in otherwise — there's no durable host-native store to reach for
/// here since this subsystem only ever runs embedded in a browser; the
/// native path exists purely so the rest of the crate is host-testable.
#[derive(Default)]
pub struct PersistentBlobStore {
    #[cfg(feature = "wasm")]
    inner: wasm_impl::IndexedDbBlobStore,
    #[cfg(not(feature = "wasm"))]
    inner: native_impl::InMemoryBlobStore,
}

impl PersistentBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg_attr(not(feature = "wasm"), async_trait::async_trait)]
#[cfg_attr(feature = "wasm", async_trait::async_trait(?Send))]
impl BlobStore for PersistentBlobStore {
    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.inner.save(key, bytes).await
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.load(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }
}

#[cfg(not(feature = "wasm"))]
mod native_impl {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Stands in for the IndexedDB store on any host without a DOM. Holds
    /// the same last-writer-wins-per-key contract as the real store, minus
    /// persistence across process restarts — it exists to build and test
    /// this crate off-browser, and never claims durability.
    #[derive(Default)]
    pub struct InMemoryBlobStore {
        data: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait::async_trait]
    impl BlobStore for InMemoryBlobStore {
        async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
            self.data
                .lock()
                .map_err(|_| Error::StoreIo("blob store mutex poisoned".into()))?
                .insert(key.to_string(), bytes);
            Ok(())
        }

        async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
            Ok(self
                .data
                .lock()
                .map_err(|_| Error::StoreIo("blob store mutex poisoned".into()))?
                .get(key)
                .cloned())
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.data
                .lock()
                .map_err(|_| Error::StoreIo("blob store mutex poisoned".into()))?
                .remove(key);
            Ok(())
        }
    }
}

#[cfg(feature = "wasm")]
mod wasm_impl {
    use super::*;
    use js_sys::{Array, Uint8Array};
    use std::cell::Cell;
    use wasm_bindgen::closure::Closure;
    use wasm_bindgen::{JsCast, JsValue};
    use wasm_bindgen_futures::JsFuture;
    use web_sys::{
        DomException, Event, IdbDatabase, IdbObjectStore, IdbRequest, IdbTransaction,
        IdbTransactionMode,
    };

    /// The IndexedDB version we last successfully opened at. Bumped
    /// on-demand whenever the object store turns out to be missing: a
    /// prior `delete()` of the whole database (or a version race) can
    /// leave us pointed at a version number with no store, and re-opening
    /// at `version` again would just replay the same miss.
    #[derive(Default)]
    pub struct IndexedDbBlobStore {
        known_version: Cell<u32>,
    }

    #[async_trait::async_trait(?Send)]
    impl BlobStore for IndexedDbBlobStore {
        async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
            self.with_store(IdbTransactionMode::Readwrite, |store| {
                let array = Uint8Array::from(bytes.as_slice());
                store
                    .put_with_key(&array, &JsValue::from_str(key))
                    .map_err(js_op_err)
            })
            .await
        }

        async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
            let result = self
                .with_store_result(IdbTransactionMode::Readonly, |store| {
                    store.get(&JsValue::from_str(key)).map_err(js_op_err)
                })
                .await?;
            if result.is_null() || result.is_undefined() {
                return Ok(None);
            }
            let array: Uint8Array = result
                .dyn_into()
                .map_err(|_| Error::StoreIo("blob store returned a non-bytes value".into()))?;
            Ok(Some(array.to_vec()))
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.with_store(IdbTransactionMode::Readwrite, |store| {
                store.delete(&JsValue::from_str(key)).map_err(js_op_err)
            })
            .await
        }
    }

    /// Sentinel `StoreIo` message distinguishing "the object store doesn't
    /// exist on this already-open database" (recoverable by bumping the
    /// version and recreating it in `onupgradeneeded`) from any other
    /// transaction-open failure.
    const MISSING_STORE_SENTINEL: &str = "__missing_store__";

    impl IndexedDbBlobStore {
        async fn with_store<F>(&self, mode: IdbTransactionMode, op: F) -> Result<()>
        where
            F: Fn(&IdbObjectStore) -> Result<IdbRequest>,
        {
            self.with_store_result(mode, op).await.map(|_| ())
        }

        /// Opens at the known version and runs `op` inside a transaction,
        /// timeout-guarded as a whole. The object store can be missing on an
        /// already-open database (a race with a prior whole-database
        /// `delete()`, or a version bump that hasn't reached this instance's
        /// `known_version` yet) — that failure only surfaces from
        /// `transaction_with_str_and_mode`, not from `open_at`, since opening
        /// an existing database at its current version never runs
        /// `onupgradeneeded`. When it does, bump the version and retry the
        /// whole operation once through a fresh `open_at`, which does run the
        /// upgrade handler and recreates the store.
        async fn with_store_result<F>(&self, mode: IdbTransactionMode, op: F) -> Result<JsValue>
        where
            F: Fn(&IdbObjectStore) -> Result<IdbRequest>,
        {
            let with_timeout = async {
                let version = self.known_version.get().max(1);
                let db = self.open_at(version).await?;
                match self.run_in_transaction(&db, mode, &op).await {
                    Err(Error::StoreIo(msg)) if msg == MISSING_STORE_SENTINEL => {
                        let next = version + 1;
                        let db = self.open_at(next).await?;
                        self.known_version.set(next);
                        self.run_in_transaction(&db, mode, &op).await
                    }
                    other => other,
                }
            };
            race_timeout(with_timeout, DEFAULT_TIMEOUT).await
        }

        async fn run_in_transaction<F>(
            &self,
            db: &IdbDatabase,
            mode: IdbTransactionMode,
            op: &F,
        ) -> Result<JsValue>
        where
            F: Fn(&IdbObjectStore) -> Result<IdbRequest>,
        {
            let tx = db
                .transaction_with_str_and_mode(OBJECT_STORE_NAME, mode)
                .map_err(|e| {
                    if is_missing_store_error(&e) {
                        Error::StoreIo(MISSING_STORE_SENTINEL.to_string())
                    } else {
                        js_op_err(e)
                    }
                })?;
            let store = tx.object_store(OBJECT_STORE_NAME).map_err(js_op_err)?;
            let request = op(&store)?;
            let result = request_result(request).await?;
            await_transaction(tx).await?;
            Ok(result)
        }

        async fn open_at(&self, version: u32) -> Result<IdbDatabase> {
            let factory = idb_factory()?;
            let open_request = factory
                .open_with_u32(DB_NAME, version)
                .map_err(js_op_err)?;

            let upgrade_request = open_request.clone();
            let on_upgrade = Closure::once(move |_event: Event| {
                if let Ok(result) = upgrade_request.result() {
                    if let Ok(db) = result.dyn_into::<IdbDatabase>() {
                        let _ = db.create_object_store(OBJECT_STORE_NAME);
                    }
                }
            });
            open_request.set_onupgradeneeded(Some(on_upgrade.as_ref().unchecked_ref()));
            on_upgrade.forget();

            let blocked_request = open_request.clone();
            let promise = js_sys::Promise::new(&mut |resolve, reject| {
                let success_request = blocked_request.clone();
                let on_success = Closure::once(move |_event: Event| {
                    if let Ok(result) = success_request.result() {
                        let _ = resolve.call1(&JsValue::NULL, &result);
                    }
                });
                let error_request = blocked_request.clone();
                let reject_on_error = reject.clone();
                let on_error = Closure::once(move |_event: Event| {
                    let message = error_request
                        .error()
                        .ok()
                        .flatten()
                        .map(|e| e.message())
                        .unwrap_or_else(|| "indexeddb open error".to_string());
                    let _ = reject_on_error.call1(&JsValue::NULL, &JsValue::from_str(&message));
                });
                let on_blocked = Closure::once(move |_event: Event| {
                    let _ = reject.call1(&JsValue::NULL, &JsValue::from_str("__blocked__"));
                });
                blocked_request.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
                blocked_request.set_onerror(Some(on_error.as_ref().unchecked_ref()));
                blocked_request.set_onblocked(Some(on_blocked.as_ref().unchecked_ref()));
                on_success.forget();
                on_error.forget();
                on_blocked.forget();
            });

            let result = JsFuture::from(promise).await.map_err(|err| {
                if err.as_string().as_deref() == Some("__blocked__") {
                    Error::StoreBlocked
                } else {
                    js_op_err(err)
                }
            })?;
            result
                .dyn_into::<IdbDatabase>()
                .map_err(|_| Error::StoreIo("open did not yield a database".into()))
        }
    }

    async fn request_result(request: IdbRequest) -> Result<JsValue> {
        let promise = js_sys::Promise::new(&mut |resolve, reject| {
            let success_request = request.clone();
            let on_success = Closure::once(move |_event: Event| match success_request.result() {
                Ok(result) => {
                    let _ = resolve.call1(&JsValue::NULL, &result);
                }
                Err(err) => {
                    let _ = reject.call1(&JsValue::NULL, &JsValue::from_str(&js_error_message(err)));
                }
            });
            let error_request = request.clone();
            let on_error = Closure::once(move |_event: Event| {
                let message = error_request
                    .error()
                    .ok()
                    .flatten()
                    .map(|e| e.message())
                    .unwrap_or_else(|| "indexeddb request error".to_string());
                let _ = reject.call1(&JsValue::NULL, &JsValue::from_str(&message));
            });
            request.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
            request.set_onerror(Some(on_error.as_ref().unchecked_ref()));
            on_success.forget();
            on_error.forget();
        });
        JsFuture::from(promise).await.map_err(js_op_err)
    }

    async fn await_transaction(tx: IdbTransaction) -> Result<()> {
        let promise = js_sys::Promise::new(&mut |resolve, reject| {
            let on_complete = Closure::once(move |_event: Event| {
                let _ = resolve.call0(&JsValue::NULL);
            });
            let reject_on_error = reject.clone();
            let on_error = Closure::once(move |_event: Event| {
                let _ = reject_on_error
                    .call1(&JsValue::NULL, &JsValue::from_str("indexeddb tx error"));
            });
            let on_abort = Closure::once(move |_event: Event| {
                let _ = reject.call1(&JsValue::NULL, &JsValue::from_str("indexeddb tx aborted"));
            });
            tx.set_oncomplete(Some(on_complete.as_ref().unchecked_ref()));
            tx.set_onerror(Some(on_error.as_ref().unchecked_ref()));
            tx.set_onabort(Some(on_abort.as_ref().unchecked_ref()));
            on_complete.forget();
            on_error.forget();
            on_abort.forget();
        });
        JsFuture::from(promise).await.map_err(js_op_err)?;
        Ok(())
    }

    /// Races `fut` against a `window.setTimeout`-backed promise, turning a
    /// timeout into `Error::StoreTimeout`.
    async fn race_timeout<F, T>(fut: F, timeout: Duration) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        use futures::future::{select, Either};
        futures::pin_mut!(fut);
        let timer = JsFuture::from(timeout_promise(timeout));
        futures::pin_mut!(timer);
        match select(fut, timer).await {
            Either::Left((res, _)) => res,
            Either::Right((_, _)) => Err(Error::StoreTimeout),
        }
    }

    fn timeout_promise(timeout: Duration) -> js_sys::Promise {
        js_sys::Promise::new(&mut |resolve, _reject| {
            let window = match web_sys::window() {
                Some(w) => w,
                None => {
                    let _ = resolve.call0(&JsValue::NULL);
                    return;
                }
            };
            let on_timeout = Closure::once(move || {
                let _ = resolve.call0(&JsValue::NULL);
            });
            let _ = window.set_timeout_with_callback_and_timeout_and_arguments(
                on_timeout.as_ref().unchecked_ref(),
                timeout.as_millis() as i32,
                &Array::new(),
            );
            on_timeout.forget();
        })
    }

    fn idb_factory() -> Result<web_sys::IdbFactory> {
        let window = web_sys::window()
            .ok_or_else(|| Error::StoreIo("no window in this context".into()))?;
        window
            .indexed_db()
            .map_err(js_op_err)?
            .ok_or_else(|| Error::StoreIo("indexeddb unavailable".into()))
    }

    fn js_op_err(err: JsValue) -> Error {
        Error::StoreIo(js_error_message(err))
    }

    /// IndexedDB throws a `NotFoundError` `DOMException` from
    /// `transaction()` when the named object store doesn't exist on the
    /// database as currently opened.
    fn is_missing_store_error(err: &JsValue) -> bool {
        err.clone()
            .dyn_into::<DomException>()
            .map(|e| e.name() == "NotFoundError")
            .unwrap_or(false)
    }

    fn js_error_message(err: JsValue) -> String {
        if let Ok(dom_exception) = err.clone().dyn_into::<DomException>() {
            return dom_exception.message();
        }
        if let Some(message) = err.as_string() {
            return message;
        }
        format!("{err:?}")
    }
}
