/*!
# Gestión de Cobro

Receivables dashboard for an education provider: the finance team uploads the
installment workbook, and the crate normalizes it into a ledger, slices it
into a fixed set of views and exports whatever the user has looked at.

## Pipeline

1. **loader** reads the upload (`.xlsx`/`.xls`/`.ods` through calamine, or
   CSV) into a [`table::RawTable`].
2. **headers** normalizes the column names (spacing, Unicode composition) and
   **periods** recognizes the period columns (`Total 2020`, `Enero 2024`, ...).
3. **ledger** types the rows into installments with amounts per period.
4. **filter** and **aggregate** select rows and sum periods, clients and
   states; **views** builds each dashboard view on top of them.
5. **registry** keeps the last good result of each view; **downloader**
   turns it into a multi-sheet workbook, CSV or a standalone HTML report.

## Modules

- **saving**: workbook persistence (raw upload, compressed snapshot and
  upload timestamp) shared by every session
- **session**: per-user dashboard state (filters, registry, rendered html)
- **login**: principal directory, password hashing and login sessions
- **config**: settings from the environment
- **charts**: figure descriptions rendered by plotly in the browser
- **graph**, **mailer**, **app**: PNG charts, report mail and the axum
  server (feature `web`)
*/

pub mod aggregate;
pub mod charts;
pub mod config;
pub mod downloader;
pub mod error;
pub mod filter;
pub mod headers;
pub mod ledger;
pub mod loader;
pub mod login;
pub mod periods;
pub mod registry;
pub mod saving;
pub mod session;
pub mod table;
pub mod views;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod graph;
#[cfg(feature = "web")]
pub mod mailer;

pub use error::{DashboardError, Result};
