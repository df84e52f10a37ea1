//! Integration tests: the full engine and API wired to in-memory sources.

mod api_flow;
mod mock_sources;
mod scenarios;
