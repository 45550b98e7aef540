//! HTTP surface: login, the five-area navigation shell, workbook upload and
//! reset, the receivables views and their exports.

use axum::{
    Extension, Form, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::Query;
use chrono::{Local, NaiveDate};
use log::{info, warn};
use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::Settings;
use crate::downloader::escape_html;
use crate::error::DashboardError;
use crate::graph::{GraphOptions, render_png};
use crate::loader::load_bytes;
use crate::login::{self, AuthContext, Principal, PrincipalDirectory};
use crate::mailer::Mailer;
use crate::saving::{StoredWorkbook, WorkbookStore, format_timestamp};
use crate::session::{DashboardSession, SessionStore};
use crate::views::{Axis, FilterOptions, ViewFilters, ViewKey, ViewState, filter_options_for};

/// Largest accepted upload.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// How often dashboard sessions of expired logins are dropped.
const SESSION_SWEEP: std::time::Duration = std::time::Duration::from_secs(10 * 60);

const LAYOUT: &str = include_str!("./static/layout.html");

pub struct AppState {
    pub settings: Settings,
    pub store: WorkbookStore,
    pub sessions: SessionStore,
    pub directory: PrincipalDirectory,
    pub mailer: Option<Mailer>,
}

impl AppState {
    pub fn new(settings: Settings) -> crate::Result<Self> {
        let store = WorkbookStore::new(&settings.data_dir)?;
        let directory = PrincipalDirectory::load(&settings.users_file)?;
        let mailer = match &settings.mail {
            Some(mail) => Some(Mailer::new(mail)?),
            None => None,
        };
        Ok(AppState {
            settings,
            store,
            sessions: SessionStore::new(),
            directory,
            mailer,
        })
    }
}

/// Error responses of the web handlers.
pub enum AppError {
    Dashboard(DashboardError),
    NotFound,
    Forbidden,
}

impl From<DashboardError> for AppError {
    fn from(e: DashboardError) -> Self {
        AppError::Dashboard(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "No encontrado").into_response(),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "Acción reservada a administradores").into_response(),
            AppError::Dashboard(e) => {
                let status = match &e {
                    DashboardError::MissingInput
                    | DashboardError::SchemaMismatch { .. }
                    | DashboardError::EmptyResult { .. } => StatusCode::CONFLICT,
                    DashboardError::ExportFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    DashboardError::Workbook(_) | DashboardError::Csv(_) => StatusCode::BAD_REQUEST,
                    DashboardError::Auth(_) => StatusCode::FORBIDDEN,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    warn!("request failed: {}", e);
                }
                (status, e.to_string()).into_response()
            }
        }
    }
}

type AppResult<T> = std::result::Result<T, AppError>;

/// Starts the server on the configured address
///
/// # Arguments
/// * `settings` - Runtime settings
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Runs until the listener fails
pub async fn run(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let bind = settings.bind.clone();
    let state = Arc::new(AppState::new(settings)?);
    if state.directory.is_empty() {
        warn!("no principals configured; use `gestion-dashboard hash-password` to create one");
    }

    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SESSION_SWEEP);
        loop {
            tick.tick().await;
            sweeper.sessions.close_expired();
        }
    });

    let listener = TcpListener::bind(&bind).await?;
    info!("listening on http://{}", bind);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/", get(|| async { Redirect::to("/inicio") }))
        .route("/logout", get(login::handle_logout))
        .route("/inicio", get(home))
        .route("/admisiones", get(|ctx: Extension<AuthContext>| area(ctx, "Admisiones")))
        .route("/academica", get(|ctx: Extension<AuthContext>| area(ctx, "Academica")))
        .route("/desarrollo", get(|ctx: Extension<AuthContext>| area(ctx, "Desarrollo")))
        .route("/cobros", get(dashboard))
        .route("/cobros/opciones", get(options))
        .route("/cobros/subir", post(upload))
        .route("/cobros/restablecer", post(reset))
        .route("/cobros/vista/:key", get(view_page))
        .route("/cobros/vista/:key/csv", get(view_csv))
        .route("/cobros/vista/:key/grafico/:idx", get(view_chart))
        .route("/cobros/exportar/xlsx", get(export_xlsx))
        .route("/cobros/exportar/html", get(export_html))
        .route("/cobros/enviar", post(mail_report))
        .route_layer(middleware::from_fn_with_state(state.clone(), login::require_auth));

    Router::new()
        .route("/login", get(login::serve_login_page).post(login::handle_login))
        .merge(protected)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Fills `{{name}}` placeholders in one pass; inserted values are not rescanned.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = &after[..end];
                match values.iter().find(|(k, _)| *k == name) {
                    Some((_, v)) => out.push_str(v),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn page(title: &str, principal: &Principal, body: &str) -> Html<String> {
    let user = format!(
        "{} ({})",
        escape_html(&principal.username),
        if principal.is_admin() { "admin" } else { "lectura" }
    );
    let title = escape_html(title);
    Html(fill_template(
        LAYOUT,
        &[("title", title.as_str()), ("user", user.as_str()), ("body", body)],
    ))
}

fn session_for(state: &AppState, ctx: &AuthContext) -> Arc<Mutex<DashboardSession>> {
    state
        .sessions
        .get(&ctx.session_id)
        .unwrap_or_else(|| state.sessions.insert(&ctx.session_id, ctx.principal.clone()))
}

fn lock(session: &Mutex<DashboardSession>) -> AppResult<MutexGuard<'_, DashboardSession>> {
    session.lock().map_err(|_| {
        AppError::Dashboard(DashboardError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "session lock poisoned",
        )))
    })
}

fn require_admin(ctx: &AuthContext) -> AppResult<()> {
    if ctx.principal.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

async fn home(Extension(ctx): Extension<AuthContext>) -> Html<String> {
    let body = "<p>Seleccione un área en la barra superior.</p>\n<ul>\
        <li><a href=\"/admisiones\">Admisiones</a></li>\
        <li><a href=\"/academica\">Academica</a></li>\
        <li><a href=\"/desarrollo\">Desarrollo</a></li>\
        <li><a href=\"/cobros\">Gestión de Cobro</a></li></ul>";
    page("Inicio", &ctx.principal, body)
}

/// Areas served by other systems.
async fn area(Extension(ctx): Extension<AuthContext>, name: &'static str) -> Html<String> {
    let body = format!(
        "<p class=\"notice\">El área {} la gestiona un sistema externo y no está disponible desde este panel.</p>",
        name
    );
    page(name, &ctx.principal, &body)
}

async fn dashboard(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> AppResult<Html<String>> {
    let session = session_for(&state, &ctx);
    let mut s = lock(&session)?;
    s.sync(&state.store)?;

    let mut body = String::new();
    match (&s.workbook_filename, &s.upload_timestamp) {
        (Some(name), Some(at)) => body.push_str(&format!(
            "<p>Archivo cargado: <strong>{}</strong> ({})</p>\n",
            escape_html(name),
            escape_html(at)
        )),
        _ => body.push_str("<p class=\"notice\">Todavía no se ha subido ningún archivo de cobros.</p>\n"),
    }

    if ctx.principal.is_admin() {
        body.push_str(
            "<form method=\"post\" action=\"/cobros/subir\" enctype=\"multipart/form-data\">\
             <input type=\"file\" name=\"archivo\" accept=\".xlsx,.xls,.xlsm,.ods,.csv\" required> \
             <button type=\"submit\">Subir archivo</button></form>\n\
             <form method=\"post\" action=\"/cobros/restablecer\">\
             <button type=\"submit\">Restablecer</button></form>\n",
        );
    }

    body.push_str("<h2>Vistas</h2>\n<ul>\n");
    for view in ViewKey::ALL {
        let mark = if s.export_registry.get(view.as_str()).is_some() { " ✓" } else { "" };
        body.push_str(&format!(
            "<li><a href=\"/cobros/vista/{}\">{}</a>{}</li>\n",
            view.as_str(),
            escape_html(view.title()),
            mark
        ));
    }
    body.push_str("</ul>\n");

    if !s.export_registry.is_empty() {
        body.push_str(&format!(
            "<p>{} vista(s) lista(s) para exportar: \
             <a href=\"/cobros/exportar/xlsx\">Excel</a> · <a href=\"/cobros/exportar/html\">Informe HTML</a></p>\n",
            s.export_registry.len()
        ));
        if ctx.principal.is_admin() && state.mailer.is_some() {
            body.push_str(
                "<form method=\"post\" action=\"/cobros/enviar\">\
                 <input type=\"email\" name=\"destinatario\" placeholder=\"correo@ejemplo.com\" required> \
                 <button type=\"submit\">Enviar informe</button></form>\n",
            );
        }
    }

    Ok(page("Gestión de Cobro", &ctx.principal, &body))
}

#[derive(Debug, Default, Deserialize)]
pub struct OptionsQuery {
    vista: Option<String>,
}

async fn options(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<OptionsQuery>,
) -> AppResult<axum::Json<FilterOptions>> {
    let view = match query.vista.as_deref() {
        Some(key) => ViewKey::parse(key).ok_or(AppError::NotFound)?,
        None => ViewKey::Global,
    };
    let session = session_for(&state, &ctx);
    let mut s = lock(&session)?;
    s.sync(&state.store)?;
    let ledger = s.workbook.as_deref().ok_or(DashboardError::MissingInput)?;
    Ok(axum::Json(filter_options_for(ledger, view)))
}

/// Parses an uploaded file and publishes it. Blocking: disk and parse work.
fn ingest(store: &WorkbookStore, name: &str, bytes: &[u8]) -> crate::Result<StoredWorkbook> {
    let table = load_bytes(bytes, name)?;
    store.publish(bytes, name, table)
}

/// Runs blocking store work on the blocking pool.
async fn blocking<T, F>(state: &Arc<AppState>, work: F) -> crate::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&AppState) -> crate::Result<T> + Send + 'static,
{
    let worker = state.clone();
    tokio::task::spawn_blocking(move || work(&worker))
        .await
        .map_err(|e| DashboardError::Io(std::io::Error::other(e.to_string())))?
}

async fn upload(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    mut multipart: Multipart,
) -> AppResult<Redirect> {
    require_admin(&ctx)?;

    let mut file: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DashboardError::Workbook(e.to_string()))?
    {
        if field.name() != Some("archivo") {
            continue;
        }
        let name = field.file_name().unwrap_or("cobros.xlsx").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| DashboardError::Workbook(e.to_string()))?;
        file = Some((name, bytes.to_vec()));
    }
    let (name, bytes) = file.ok_or_else(|| DashboardError::Workbook("no file received".to_string()))?;

    let stored = blocking(&state, move |st| ingest(&st.store, &name, &bytes)).await?;
    info!("{} uploaded {} at {}", ctx.principal.username, stored.filename, stored.uploaded_at);
    Ok(Redirect::to("/cobros"))
}

async fn reset(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> AppResult<Redirect> {
    require_admin(&ctx)?;
    blocking(&state, |st| st.store.reset()).await?;
    info!("{} reset the workbook", ctx.principal.username);
    Ok(Redirect::to("/cobros"))
}

/// Query string of a view page. Repeated keys carry multiple selections.
#[derive(Debug, Default, Deserialize)]
pub struct FilterQuery {
    #[serde(default)]
    estado: Vec<String>,
    #[serde(default)]
    forma_pago: Vec<String>,
    #[serde(default)]
    cliente: Vec<String>,
    #[serde(default)]
    periodos: Vec<String>,
    #[serde(default)]
    texto: Option<String>,
    aplicar: Option<String>,
    limpiar: Option<String>,
}

impl FilterQuery {
    fn values(&self, axis: Axis) -> Vec<String> {
        match axis {
            Axis::Estado => self.estado.clone(),
            Axis::FormaPago => self.forma_pago.clone(),
            Axis::Cliente => self.cliente.clone(),
            Axis::Periodos => self.periodos.clone(),
            Axis::Texto => self.texto.iter().cloned().collect(),
        }
    }
}

fn options_for(axis: Axis, options: &FilterOptions) -> &[String] {
    match axis {
        Axis::Estado => &options.estados,
        Axis::FormaPago => &options.formas_pago,
        Axis::Cliente => &options.clientes,
        Axis::Periodos => &options.periodos,
        Axis::Texto => &[],
    }
}

fn axis_label(axis: Axis) -> &'static str {
    match axis {
        Axis::Estado => "Estado",
        Axis::FormaPago => "Forma de pago",
        Axis::Cliente => "Cliente",
        Axis::Periodos => "Periodos",
        Axis::Texto => "Buscar en proyecto, curso o comercial",
    }
}

fn filter_form(view: ViewKey, filters: &ViewFilters, options: &FilterOptions) -> String {
    let mut html = format!(
        "<form class=\"filters\" method=\"get\" action=\"/cobros/vista/{}\">\n",
        view.as_str()
    );
    for axis in view.axes() {
        let selected = filters.axis(*axis);
        html.push_str(&format!("<fieldset><legend>{}</legend>", axis_label(*axis)));
        if *axis == Axis::Texto {
            html.push_str(&format!(
                "<input name=\"texto\" value=\"{}\">",
                escape_html(&filters.texto)
            ));
        } else {
            html.push_str(&format!("<select name=\"{}\" multiple>", axis.as_str()));
            for opt in options_for(*axis, options) {
                let sel = if selected.iter().any(|s| s == opt) { " selected" } else { "" };
                html.push_str(&format!(
                    "<option value=\"{v}\"{sel}>{v}</option>",
                    v = escape_html(opt),
                    sel = sel
                ));
            }
            html.push_str("</select>");
        }
        html.push_str("</fieldset>\n");
    }
    html.push_str(&format!(
        "<input type=\"hidden\" name=\"aplicar\" value=\"1\"><button type=\"submit\">Aplicar</button> \
         <a href=\"/cobros/vista/{}?limpiar=1\">Limpiar filtros</a>\n</form>\n",
        view.as_str()
    ));
    html
}

fn outcome_html(view: ViewKey, outcome: &ViewState, fragment: Option<&str>) -> String {
    match outcome {
        ViewState::NoInput => {
            "<p class=\"notice\">Suba un archivo de cobros para ver esta vista.</p>".to_string()
        }
        ViewState::MissingColumns { missing } => format!(
            "<p class=\"error\">Faltan columnas necesarias para esta vista: {}</p>",
            escape_html(&missing.join(", "))
        ),
        ViewState::EmptyResult { table, notice } => format!(
            "<p class=\"notice\">{}</p>\n{}",
            escape_html(notice),
            crate::downloader::table_html(table)
        ),
        ViewState::Ready(entry) | ViewState::Registered(entry) => {
            let mut html = fragment
                .map(str::to_string)
                .unwrap_or_else(|| crate::downloader::view_fragment(view.as_str(), entry));
            html.push_str(&format!(
                "<p><a href=\"/cobros/vista/{key}/csv\">Descargar CSV</a>",
                key = view.as_str()
            ));
            for i in 0..entry.figures.len() {
                html.push_str(&format!(
                    " · <a href=\"/cobros/vista/{}/grafico/{}\">Gráfico {} (PNG)</a>",
                    view.as_str(),
                    i,
                    i + 1
                ));
            }
            html.push_str("</p>");
            html
        }
    }
}

fn parse_view(key: &str) -> AppResult<ViewKey> {
    ViewKey::parse(key).ok_or(AppError::NotFound)
}

async fn view_page(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(key): Path<String>,
    Query(query): Query<FilterQuery>,
) -> AppResult<Html<String>> {
    let view = parse_view(&key)?;
    let session = session_for(&state, &ctx);
    let mut s = lock(&session)?;
    s.sync(&state.store)?;

    if query.limpiar.is_some() {
        s.clear_filters(view);
    } else if query.aplicar.is_some() {
        for axis in view.axes() {
            s.set_filter(view, *axis, query.values(*axis));
        }
    }

    let outcome = s.render(view, today());
    if let Some(err) = outcome.to_error(view) {
        warn!("{}: {}", ctx.principal.username, err);
    }
    let options = s
        .workbook
        .as_deref()
        .map(|ledger| filter_options_for(ledger, view))
        .unwrap_or_default();

    let mut body = filter_form(view, &s.filters(view), &options);
    body.push_str(&outcome_html(view, &outcome, s.html(view)));
    Ok(page(view.title(), &ctx.principal, &body))
}

async fn view_csv(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(key): Path<String>,
) -> AppResult<Response> {
    let view = parse_view(&key)?;
    let session = session_for(&state, &ctx);
    let mut s = lock(&session)?;
    s.sync(&state.store)?;
    let csv = s.export_csv(view)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!(
                    "attachment; filename=\"{}.csv\"; filename*=UTF-8''{}.csv",
                    view.as_str(),
                    urlencoding::encode(view.title())
                ),
            ),
        ],
        csv,
    )
        .into_response())
}

async fn view_chart(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path((key, idx)): Path<(String, usize)>,
) -> AppResult<Response> {
    let view = parse_view(&key)?;
    let figure = {
        let session = session_for(&state, &ctx);
        let mut s = lock(&session)?;
        s.sync(&state.store)?;
        s.export_registry
            .get(view.as_str())
            .and_then(|e| e.figures.get(idx))
            .cloned()
            .ok_or(AppError::NotFound)?
    };
    let png = render_png(&figure, GraphOptions::default())?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

async fn export_xlsx(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> AppResult<Response> {
    let session = session_for(&state, &ctx);
    let mut s = lock(&session)?;
    s.sync(&state.store)?;
    let bytes = s.export_xlsx()?;
    info!("{} exported {} views to xlsx", ctx.principal.username, s.export_registry.len());
    Ok((
        [
            (
                header::CONTENT_TYPE,
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            ),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"informe_cobros.xlsx\""),
        ],
        bytes,
    )
        .into_response())
}

async fn export_html(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> AppResult<Response> {
    let session = session_for(&state, &ctx);
    let mut s = lock(&session)?;
    s.sync(&state.store)?;
    let html = s.export_html(&format_timestamp(Local::now()));
    info!("{} exported {} views to html", ctx.principal.username, s.export_registry.len());
    Ok((
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"informe_cobros.html\""),
        ],
        html,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct MailForm {
    destinatario: String,
}

async fn mail_report(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Form(form): Form<MailForm>,
) -> AppResult<Redirect> {
    require_admin(&ctx)?;
    if state.mailer.is_none() {
        return Err(DashboardError::Config("mail sender is not configured".to_string()).into());
    }

    let generated_at = format_timestamp(Local::now());
    let html = {
        let session = session_for(&state, &ctx);
        let mut s = lock(&session)?;
        s.sync(&state.store)?;
        if s.export_registry.is_empty() {
            return Err(DashboardError::ExportFailure("no views have been registered yet".to_string()).into());
        }
        s.export_html(&generated_at)
    };

    let worker = state.clone();
    tokio::task::spawn_blocking(move || match &worker.mailer {
        Some(mailer) => mailer.send_report(&form.destinatario, &generated_at, html),
        None => Ok(()),
    })
    .await
    .map_err(|e| DashboardError::Mail(e.to_string()))??;

    Ok(Redirect::to("/cobros"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_fill_is_single_pass() {
        let out = fill_template("<h1>{{title}}</h1>{{body}}{{other}}", &[("title", "{{body}}"), ("body", "x")]);
        assert_eq!(out, "<h1>{{body}}</h1>x{{other}}");
    }

    #[test]
    fn unterminated_placeholder_is_kept() {
        assert_eq!(fill_template("a {{b", &[("b", "c")]), "a {{b");
    }

    #[test]
    fn ingest_publishes_a_parsed_upload() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkbookStore::new(dir.path()).unwrap();
        let csv = b"Cliente,Estado,Forma Pago,Total 2020\nA,PENDIENTE,Becas ISA,10\n";

        let stored = ingest(&store, "cobros.csv", csv).unwrap();
        assert_eq!(stored.filename, "cobros.csv");
        assert_eq!(stored.ledger.rows.len(), 1);
        let current = store.current().unwrap().unwrap();
        assert_eq!(current.revision, stored.revision);
    }

    #[test]
    fn ingest_rejects_unreadable_excel_and_keeps_store_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkbookStore::new(dir.path()).unwrap();
        assert!(ingest(&store, "cobros.xlsx", b"no es un libro").is_err());
        assert!(store.current().unwrap().is_none());
    }
}
