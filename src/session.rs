//! Per-user dashboard state.
//!
//! A session holds the principal, its view of the shared workbook, the
//! filter selections (`filter_<view>_<axis>`), the export registry and the
//! rendered HTML fragment of each registered view (`html_<view>`). When the
//! shared workbook changes or is reset, the workbook is swapped and every
//! view output is dropped.

use crate::downloader::{to_csv, to_html, to_xlsx, view_fragment};
use crate::error::{DashboardError, Result};
use crate::ledger::Ledger;
use crate::login::{purge_expired_sessions, validate_session, Principal};
use crate::registry::ExportRegistry;
use crate::saving::WorkbookStore;
use crate::views::{render_view, Axis, ViewFilters, ViewKey, ViewState};
use chrono::NaiveDate;
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

pub fn filter_key(view: ViewKey, axis: Axis) -> String {
    format!("filter_{}_{}", view.as_str(), axis.as_str())
}

pub fn html_key(view: &str) -> String {
    format!("html_{}", view)
}

#[derive(Debug)]
pub struct DashboardSession {
    pub id: String,
    pub principal: Principal,
    pub workbook: Option<Arc<Ledger>>,
    pub workbook_filename: Option<String>,
    pub upload_timestamp: Option<String>,
    revision: Option<String>,
    pub current_view: ViewKey,
    filters: HashMap<String, Vec<String>>,
    pub export_registry: ExportRegistry,
    html: BTreeMap<String, String>,
}

impl DashboardSession {
    pub fn new(id: &str, principal: Principal) -> Self {
        DashboardSession {
            id: id.to_string(),
            principal,
            workbook: None,
            workbook_filename: None,
            upload_timestamp: None,
            revision: None,
            current_view: ViewKey::Global,
            filters: HashMap::new(),
            export_registry: ExportRegistry::new(),
            html: BTreeMap::new(),
        }
    }

    /// Aligns the session with the shared store.
    ///
    /// Returns `true` when the workbook changed (new upload or reset), in
    /// which case the registry and HTML fragments were cleared.
    pub fn sync(&mut self, store: &WorkbookStore) -> Result<bool> {
        let current = store.current()?;
        let revision = current.as_ref().map(|w| w.revision.clone());
        if revision == self.revision {
            return Ok(false);
        }

        debug!(
            "session {}: workbook revision {:?} -> {:?}",
            self.id, self.revision, revision
        );
        match current {
            Some(w) => {
                self.workbook = Some(w.ledger);
                self.workbook_filename = Some(w.filename);
                self.upload_timestamp = Some(w.uploaded_at);
            }
            None => {
                self.workbook = None;
                self.workbook_filename = None;
                self.upload_timestamp = None;
            }
        }
        self.revision = revision;
        self.clear_outputs();
        Ok(true)
    }

    pub fn clear_outputs(&mut self) {
        self.export_registry.clear();
        self.html.clear();
    }

    pub fn filters(&self, view: ViewKey) -> ViewFilters {
        let mut f = ViewFilters::default();
        for axis in Axis::ALL {
            if let Some(values) = self.filters.get(&filter_key(view, axis)) {
                f.set_axis(axis, values.clone());
            }
        }
        f
    }

    pub fn set_filter(&mut self, view: ViewKey, axis: Axis, values: Vec<String>) {
        let key = filter_key(view, axis);
        if values.iter().all(|v| v.trim().is_empty()) {
            self.filters.remove(&key);
        } else {
            self.filters.insert(key, values);
        }
    }

    pub fn clear_filters(&mut self, view: ViewKey) {
        for axis in Axis::ALL {
            self.filters.remove(&filter_key(view, axis));
        }
    }

    /// Renders `view` with the stored filters and registers the result.
    ///
    /// Only a successful render is registered. Any other outcome drops a
    /// previously registered entry for the view, so exports always reflect
    /// the current filters.
    pub fn render(&mut self, view: ViewKey, today: NaiveDate) -> ViewState {
        self.current_view = view;
        let filters = self.filters(view);
        let state = render_view(self.workbook.as_deref(), view, &filters, today);

        match state {
            ViewState::Ready(entry) => {
                self.html
                    .insert(html_key(view.as_str()), view_fragment(view.as_str(), &entry));
                self.export_registry.register(view.as_str(), entry.clone());
                ViewState::Registered(entry)
            }
            other => {
                self.export_registry.remove(view.as_str());
                self.html.remove(&html_key(view.as_str()));
                other
            }
        }
    }

    pub fn html(&self, view: ViewKey) -> Option<&str> {
        self.html.get(&html_key(view.as_str())).map(String::as_str)
    }

    pub fn export_xlsx(&self) -> Result<Vec<u8>> {
        to_xlsx(&self.export_registry)
    }

    pub fn export_html(&self, generated_at: &str) -> String {
        to_html(&self.export_registry, generated_at)
    }

    /// CSV of a registered view's table.
    pub fn export_csv(&self, view: ViewKey) -> Result<String> {
        let entry = self
            .export_registry
            .get(view.as_str())
            .ok_or_else(|| DashboardError::ExportFailure(format!("view {} is not registered", view)))?;
        to_csv(&entry.table)
    }
}

/// Live dashboard sessions keyed by session id.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<DashboardSession>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session for `principal` and returns its id.
    pub fn open(&self, principal: Principal) -> String {
        let id = Uuid::new_v4().to_string();
        self.insert(&id, principal);
        id
    }

    /// Registers a session under an id chosen by the caller.
    pub fn insert(&self, id: &str, principal: Principal) -> Arc<Mutex<DashboardSession>> {
        let session = Arc::new(Mutex::new(DashboardSession::new(id, principal)));
        if let Ok(mut map) = self.sessions.write() {
            map.insert(id.to_string(), session.clone());
        }
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Mutex<DashboardSession>>> {
        self.sessions.read().ok()?.get(id).cloned()
    }

    pub fn close(&self, id: &str) {
        if let Ok(mut map) = self.sessions.write() {
            map.remove(id);
        }
    }

    /// Closes every dashboard session whose login is expired or unknown and
    /// returns how many went.
    pub fn close_expired(&self) -> usize {
        purge_expired_sessions();
        let Ok(mut map) = self.sessions.write() else {
            return 0;
        };
        let before = map.len();
        map.retain(|id, _| validate_session(id).is_some());
        let closed = before - map.len();
        if closed > 0 {
            debug!("closed {} expired dashboard sessions", closed);
        }
        closed
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
