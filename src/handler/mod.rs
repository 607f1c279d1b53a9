//! Per-request task sequence: runs the configured steps in order and turns
//! the first non-continue outcome into the response.

mod output;
mod request;
mod response;
mod steps;

pub use request::{Request, Upload};
pub use response::{Cookie, Response, ResponseWriter};
pub use steps::{Flow, Signal, SignalKind, Step};

use crate::error::HandlerError;
use crate::factory::{ConfigSnapshot, Factory, ListQuery, Pager};
use crate::ghost::{Entity, Ghost, Thing, NEW_ID};
use crate::store::{key_text, Match, Row};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// The signed-in user behind the session cookie's token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Session {
    pub user: String,
    #[serde(skip)]
    pub token: String,
}

#[derive(Debug, Default)]
struct State {
    moniker: Option<String>,
    id: Option<String>,
    thing: Option<Thing>,
    view: Option<String>,
    op: Option<String>,
    page: u32,
    per_page: Option<u32>,
    sort: Option<String>,
    descending: bool,
    results: Option<Vec<Entity>>,
    pager: Option<Pager>,
    errors: Vec<String>,
    messages: Vec<String>,
    signal: Option<Signal>,
    rendered: bool,
}

pub struct RequestHandler {
    factory: Arc<Factory>,
    /// Configuration seen by this request from start to finish.
    config: Arc<ConfigSnapshot>,
    request: Request,
    out: ResponseWriter,
    session: Option<Session>,
    state: State,
}

impl RequestHandler {
    pub fn new(factory: Arc<Factory>, request: Request) -> Self {
        let config = factory.config();
        let session = request
            .cookie(&config.settings.session_cookie)
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .and_then(|token| {
                let user = factory.sessions().user(token)?;
                Some(Session {
                    user,
                    token: token.to_string(),
                })
            });
        RequestHandler {
            factory,
            config,
            request,
            out: ResponseWriter::new(),
            session,
            state: State::default(),
        }
    }

    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn moniker(&self) -> Option<&str> {
        self.state.moniker.as_deref()
    }

    pub fn id(&self) -> Option<&str> {
        self.state.id.as_deref()
    }

    pub fn thing(&self) -> Option<&Thing> {
        self.state.thing.as_ref()
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.state.errors.push(message.into());
    }

    pub fn add_message(&mut self, message: impl Into<String>) {
        self.state.messages.push(message.into());
    }

    /// Queue a cookie; refused once the header has been sent.
    pub fn set_cookie(&mut self, cookie: Cookie) -> bool {
        self.out.set_cookie(cookie)
    }

    pub fn header_sent(&self) -> bool {
        self.out.header_sent()
    }

    /// Run the task sequence and produce the response.
    pub async fn build_page(mut self) -> Response {
        let outcome = self.run_sequence().await;
        self.handle(outcome).await;
        self.out.finish()
    }

    /// Steps in order until one returns something other than `Continue`.
    /// Faults become server errors.
    async fn run_sequence(&mut self) -> Flow {
        for step in Step::sequence(&self.config.settings.tasks) {
            tracing::debug!(step = step.name(), "running step");
            let flow = match self.run_step(step).await {
                Ok(flow) => flow,
                Err(e) => Flow::Fail(Signal::server_error(e.to_string())),
            };
            if flow != Flow::Continue {
                return flow;
            }
        }
        Flow::Continue
    }

    pub async fn run_step(&mut self, step: Step) -> Result<Flow, HandlerError> {
        match step {
            Step::CheckPermission => Ok(self.check_permission()),
            Step::ReadInput => Ok(self.read_input()),
            Step::PerformOperation => self.perform_operation().await,
            Step::ReturnOutput => self.return_output().await,
        }
    }

    async fn handle(&mut self, flow: Flow) {
        match flow {
            Flow::Continue => {
                if !self.state.rendered {
                    let flow = match self.return_output().await {
                        Ok(flow) => flow,
                        Err(e) => Flow::Fail(Signal::server_error(e.to_string())),
                    };
                    if let Flow::Fail(signal) = flow {
                        self.handle_signal(signal);
                    }
                }
            }
            Flow::Finish { view, message } => {
                if view.is_some() {
                    self.state.view = view;
                }
                if let Some(message) = message {
                    self.state.messages.push(message);
                }
                if let Err(e) = self.load_listing().await {
                    return self.handle_signal(Signal::server_error(e.to_string()));
                }
                let view = self.current_view();
                if let Err(signal) = self.render(&view, 200) {
                    self.handle_signal(signal);
                }
            }
            Flow::Fail(signal) => self.handle_signal(signal),
            Flow::Redirect(target) => {
                tracing::debug!(target = %target, "redirecting");
                self.out.redirect(&target);
            }
        }
    }

    /// Render the view for a failure. A view named by the signal is used
    /// when its template exists; plain text when nothing renders.
    fn handle_signal(&mut self, signal: Signal) {
        let (default_view, status) = match signal.kind {
            SignalKind::NotFound => ("notfound", 404),
            SignalKind::AuthRequired if self.session.is_some() => ("denied", 403),
            SignalKind::AuthRequired => ("login", 401),
            SignalKind::ServerError => ("error", 500),
        };
        match signal.kind {
            SignalKind::ServerError => {
                tracing::error!(tenant = %self.factory.tenant(), detail = %signal.detail, "server error");
                self.factory.notifier().notify(
                    &format!("{}: server error", self.config.settings.site_name),
                    &signal.detail,
                );
            }
            _ => tracing::debug!(kind = ?signal.kind, detail = %signal.detail, "request stopped"),
        }
        if self.out.header_sent() {
            tracing::warn!(detail = %signal.detail, "failure after the response was sent");
            return;
        }
        let view = match &signal.view {
            Some(view) if self.factory.templates().has_template(view) => view.clone(),
            _ => default_view.to_string(),
        };
        self.state.view = Some(view.clone());
        self.state.signal = Some(signal);
        if let Err(e) = self.render(&view, status) {
            tracing::warn!(view = %view, detail = %e.detail, "error view unavailable, sending plain text");
            let status = self.status_for(&view, status);
            self.out.set_status(status);
            self.out.set_content_type("text/plain; charset=utf-8");
            self.out.write(&format!("{} {}\n", status, view));
        }
    }

    fn status_for(&self, view: &str, status: u16) -> u16 {
        self.config.settings.view_status.get(view).copied().unwrap_or(status)
    }

    /// View to render: explicit, else `one` with a thing, `list` with a
    /// type, else the site default.
    fn current_view(&self) -> String {
        if let Some(view) = &self.state.view {
            return view.clone();
        }
        if self.state.thing.is_some() || (self.state.moniker.is_some() && self.state.id.is_some()) {
            "one".to_string()
        } else if self.state.moniker.is_some() {
            "list".to_string()
        } else {
            self.config.settings.default_view.clone()
        }
    }

    fn render(&mut self, view: &str, status: u16) -> Result<(), Signal> {
        let engine = self.factory.templates();
        if !engine.has_template(view) {
            return Err(Signal::not_found(format!("no template for view '{}'", view)));
        }
        let bundle = self.bundle(view);
        let body = engine
            .render(view, &bundle)
            .map_err(|e| Signal::server_error(e.to_string()))?;
        let status = self.status_for(view, status);
        self.out.set_status(status);
        self.out.set_content_type("text/html; charset=utf-8");
        self.out.send_header();
        self.out.write(&body);
        self.state.rendered = true;
        Ok(())
    }

    /// Explicit `view` parameter, else the third path-info segment.
    fn requested_view(&self) -> Option<String> {
        non_empty(self.request.get("view"))
            .or_else(|| self.request.path_segments().get(2).copied())
            .map(String::from)
    }

    fn check_permission(&self) -> Flow {
        let settings = &self.config.settings;
        if let Some(view) = self.requested_view() {
            if !settings.permitted_views.is_empty() && !settings.permitted_views.contains(&view) {
                return Flow::not_found(format!("view '{}' is not permitted", view));
            }
            if settings.restricted_views.contains(&view) && self.session.is_none() {
                return Flow::auth_required(format!("view '{}' needs a session", view));
            }
        }
        if let Some(op) = non_empty(self.request.get("op")) {
            if settings.restricted_ops.iter().any(|r| r == op) {
                match &self.session {
                    None => return Flow::auth_required(format!("operation '{}' needs a session", op)),
                    Some(s) if !settings.admin_users.is_empty() && !settings.admin_users.contains(&s.user) => {
                        return Flow::auth_required(format!("user '{}' may not {}", s.user, op));
                    }
                    Some(_) => {}
                }
            }
        }
        Flow::Continue
    }

    fn read_input(&mut self) -> Flow {
        let req = &self.request;
        let mut moniker = non_empty(req.get("type"))
            .or_else(|| non_empty(req.get("moniker")))
            .map(String::from);
        let mut id = non_empty(req.get("id")).map(String::from);

        if moniker.is_none() && id.is_none() {
            let segments = req.path_segments();
            moniker = segments.first().map(|s| s.to_string());
            id = segments.get(1).map(|s| s.to_string());
        }

        if moniker.is_none() && id.is_none() {
            // First known moniker present as a parameter, in class load order.
            for m in self.factory.monikers() {
                if let Some(value) = req.get(&m) {
                    if !value.is_empty() && value != "all" {
                        id = Some(value.to_string());
                    }
                    moniker = Some(m);
                    break;
                }
            }
        }

        if let Some(m) = &moniker {
            if self.factory.class(m).is_none() {
                return Flow::not_found(format!("unknown type '{}'", m));
            }
        }

        self.state.moniker = moniker;
        self.state.id = id;
        self.state.view = self.requested_view();
        self.state.op = non_empty(req.get("op")).map(String::from);
        self.state.page = parse_u32(req.get("page")).unwrap_or(1).max(1);
        self.state.per_page = parse_u32(req.get("per_page")).filter(|n| *n > 0);
        self.state.sort = non_empty(req.get("sort")).map(String::from);
        self.state.descending = req.get("order").map(|o| o.eq_ignore_ascii_case("desc")).unwrap_or(false);
        Flow::Continue
    }

    /// Resolve the object the request names. A `new` id yields a ghost
    /// seeded from the request; other ids are fetched.
    pub async fn resolve_thing(&mut self) -> Result<Flow, HandlerError> {
        if self.state.thing.is_some() {
            return Ok(Flow::Continue);
        }
        let (Some(moniker), Some(id)) = (self.state.moniker.clone(), self.state.id.clone()) else {
            return Ok(Flow::Continue);
        };
        let Some(class) = self.factory.class(&moniker) else {
            return Ok(Flow::not_found(format!("unknown type '{}'", moniker)));
        };
        if id == NEW_ID {
            let fields = self.column_params(&moniker, false);
            return Ok(match Ghost::new(&self.factory, &moniker, fields) {
                Some(ghost) => {
                    self.state.thing = Some(Thing::Ghost(ghost));
                    Flow::Continue
                }
                None => Flow::not_found(format!("unknown type '{}'", moniker)),
            });
        }
        let Some(key) = class.parse_id(&id) else {
            return Ok(Flow::not_found(format!("'{}' is not a {} id", id, moniker)));
        };
        match self.factory.retrieve(&moniker, &key).await? {
            Some(entity) => {
                self.state.thing = Some(Thing::Persisted(entity));
                Ok(Flow::Continue)
            }
            None => {
                let signal = Signal::not_found(format!("no {} with id {}", moniker, id));
                Ok(Flow::Fail(signal.with_view(&format!("notfound_{}", moniker))))
            }
        }
    }

    /// Request values for the class's non-key columns. Empty values become
    /// null, or are dropped when `skip_empty` is set.
    fn column_params(&self, moniker: &str, skip_empty: bool) -> Row {
        let Some(class) = self.factory.class(moniker) else {
            return Row::new();
        };
        let mut row = Row::new();
        for col in class.columns(crate::class::ColumnSet::All) {
            if col == class.primary_key() || col == "id" || col == "type" {
                continue;
            }
            match self.request.get(&col) {
                Some("") if skip_empty => {}
                Some("") => {
                    row.insert(col, Value::Null);
                }
                Some(v) => {
                    row.insert(col, Value::String(v.to_string()));
                }
                None => {}
            }
        }
        row
    }

    async fn perform_operation(&mut self) -> Result<Flow, HandlerError> {
        let Some(op) = self.state.op.clone() else {
            return Ok(Flow::Continue);
        };
        match op.as_str() {
            "store" => self.store_object().await,
            "delete" => self.delete_object().await,
            "search" => self.search_objects(Match::Exact).await,
            "search_like" => self.search_objects(Match::Like).await,
            "login" => Ok(self.sign_in()),
            "logout" => Ok(self.sign_out()),
            other => Ok(Flow::not_found(format!("unknown operation '{}'", other))),
        }
    }

    fn redirect_target(&self) -> Option<String> {
        non_empty(self.request.get("redirect")).map(String::from)
    }

    /// Check `user` and `password` against the `credential` map and start a
    /// session on success.
    fn sign_in(&mut self) -> Flow {
        let Some(user) = non_empty(self.request.get("user")).map(String::from) else {
            return Flow::auth_required("sign-in needs a user");
        };
        let password = self.request.get("password").unwrap_or_default();
        let accepted = self
            .config
            .settings
            .credentials
            .get(&user)
            .is_some_and(|expected| expected == password);
        if !accepted {
            tracing::info!(user = %user, "sign-in refused");
            return Flow::auth_required(format!("bad credentials for '{}'", user));
        }
        if let Some(old) = self.session.take() {
            self.factory.sessions().close(&old.token);
        }
        let token = self.factory.sessions().open(&user);
        self.out.set_cookie(Cookie::new(&self.config.settings.session_cookie, &token));
        tracing::info!(user = %user, "signed in");
        self.session = Some(Session { user, token });
        self.state.messages.push("Signed in.".to_string());
        match self.redirect_target() {
            Some(target) => Flow::Redirect(target),
            None => Flow::Continue,
        }
    }

    fn sign_out(&mut self) -> Flow {
        if let Some(session) = self.session.take() {
            self.factory.sessions().close(&session.token);
            tracing::info!(user = %session.user, "signed out");
        }
        self.out.set_cookie(Cookie::expired(&self.config.settings.session_cookie));
        self.state.messages.push("Signed out.".to_string());
        match self.redirect_target() {
            Some(target) => Flow::Redirect(target),
            None => Flow::Continue,
        }
    }

    async fn store_object(&mut self) -> Result<Flow, HandlerError> {
        let Some(moniker) = self.state.moniker.clone() else {
            return Ok(Flow::not_found("store needs a type"));
        };
        if self.state.id.is_none() {
            self.state.id = Some(NEW_ID.to_string());
        }
        match self.resolve_thing().await? {
            Flow::Continue => {}
            other => return Ok(other),
        }
        let entity = match self.state.thing.take() {
            Some(Thing::Ghost(ghost)) => ghost.make(&self.factory).await?,
            Some(Thing::Persisted(entity)) => {
                let changes = self.column_params(&moniker, false);
                self.factory
                    .update(&moniker, &entity.id, changes)
                    .await?
                    .unwrap_or(entity)
            }
            None => return Ok(Flow::not_found("nothing to store")),
        };
        tracing::info!(moniker = %moniker, id = %key_text(&entity.id), "stored");
        self.state.id = Some(key_text(&entity.id));
        self.state.thing = Some(Thing::Persisted(entity));
        self.state.view = Some("one".to_string());
        self.state.messages.push("Saved.".to_string());
        Ok(match self.redirect_target() {
            Some(target) => Flow::Redirect(target),
            None => Flow::Continue,
        })
    }

    async fn delete_object(&mut self) -> Result<Flow, HandlerError> {
        match self.resolve_thing().await? {
            Flow::Continue => {}
            other => return Ok(other),
        }
        let (Some(moniker), Some(Thing::Persisted(entity))) = (self.state.moniker.clone(), self.state.thing.clone()) else {
            return Ok(Flow::not_found("nothing to delete"));
        };
        let snapshot = Ghost::from_existing(&self.factory, &entity);
        self.factory.delete(&moniker, &entity.id).await?;
        tracing::info!(moniker = %moniker, id = %key_text(&entity.id), "deleted");
        self.state.thing = snapshot.map(Thing::Ghost);
        self.state.id = None;
        if let Some(target) = self.redirect_target() {
            return Ok(Flow::Redirect(target));
        }
        let title = self
            .factory
            .classes()
            .managed(&moniker)
            .map(|m| m.title.clone())
            .unwrap_or_else(|| moniker.clone());
        Ok(Flow::Finish {
            view: Some("list".to_string()),
            message: Some(format!("Deleted {} {}.", title, key_text(&entity.id))),
        })
    }

    async fn search_objects(&mut self, matching: Match) -> Result<Flow, HandlerError> {
        let Some(moniker) = self.state.moniker.clone() else {
            return Ok(Flow::not_found("search needs a type"));
        };
        let criteria: Vec<(String, Value)> = self.column_params(&moniker, true).into_iter().collect();
        let results = match matching {
            Match::Exact => self.factory.search(&moniker, criteria).await?,
            Match::Like => self.factory.search_like(&moniker, criteria).await?,
        };
        self.state.results = Some(results);
        self.state.id = None;
        if self.state.view.is_none() {
            self.state.view = Some("list".to_string());
        }
        Ok(Flow::Continue)
    }

    /// A page of the current type when no object or search result is in play.
    async fn load_listing(&mut self) -> Result<(), HandlerError> {
        let Some(moniker) = self.state.moniker.clone() else {
            return Ok(());
        };
        if self.state.id.is_some() || self.state.results.is_some() || self.state.pager.is_some() {
            return Ok(());
        }
        let query = ListQuery {
            page: self.state.page,
            per_page: self.state.per_page,
            sort: self.state.sort.clone(),
            descending: self.state.descending,
            ..ListQuery::default()
        };
        self.state.pager = self.factory.list(&moniker, &query).await?;
        Ok(())
    }

    async fn return_output(&mut self) -> Result<Flow, HandlerError> {
        match self.resolve_thing().await? {
            Flow::Continue => {}
            other => return Ok(other),
        }
        self.load_listing().await?;
        let view = self.current_view();
        Ok(match self.render(&view, 200) {
            Ok(()) => Flow::Continue,
            Err(signal) => Flow::Fail(signal),
        })
    }
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

fn parse_u32(v: Option<&str>) -> Option<u32> {
    v.and_then(|s| s.trim().parse().ok())
}
