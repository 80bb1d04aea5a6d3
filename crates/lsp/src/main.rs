//! `lethe-lsp`: a thin language-server collaborator wrapping one
//! `Compiler` behind a single `tokio::sync::RwLock`:
//! mutations (recompiling on edit) take the write lock, queries
//! (completion) take the read lock. No per-document sharding -- this
//! collaborator tracks one open buffer at a time.

use std::env;

use tokio::sync::RwLock;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer, LspService, Server};
use tracing::info;

mod completion;
mod diagnostics;

#[derive(Default)]
struct ServerState {
    uri: Option<Url>,
    source: String,
}

struct LetheLanguageServer {
    client: Client,
    state: RwLock<ServerState>,
}

impl LetheLanguageServer {
    fn new(client: Client) -> Self {
        LetheLanguageServer {
            client,
            state: RwLock::new(ServerState::default()),
        }
    }

    /// Recompiles the buffer under the write lock and publishes
    /// diagnostics. A fresh `Compiler` is built per edit rather than
    /// reused, since `compile`/`resolve` accumulate onto prior state --
    /// what's wrapped in the lock is the one live `Compiler` at any given
    /// moment, not a long-lived incremental session.
    async fn recompile(&self, uri: Url, text: String) {
        let diagnostics = {
            let mut state = self.state.write().await;
            state.uri = Some(uri.clone());
            state.source = text.clone();
            diagnostics::check_document(&text)
        };
        self.client.publish_diagnostics(uri, diagnostics, None).await;
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for LetheLanguageServer {
    async fn initialize(&self, _: InitializeParams) -> Result<InitializeResult> {
        info!("lethe-lsp initializing");
        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::FULL,
                )),
                completion_provider: Some(CompletionOptions::default()),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: "lethe-lsp".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        info!("lethe-lsp initialized");
        self.client
            .log_message(MessageType::INFO, "lethe-lsp ready")
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        self.recompile(params.text_document.uri, params.text_document.text)
            .await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        if let Some(change) = params.content_changes.into_iter().next() {
            self.recompile(params.text_document.uri, change.text).await;
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        let mut state = self.state.write().await;
        if state.uri.as_ref() == Some(&uri) {
            *state = ServerState::default();
        }
        drop(state);
        self.client.publish_diagnostics(uri, vec![], None).await;
    }

    async fn completion(&self, _params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let state = self.state.read().await;
        let items = completion::get_completions(&state.source);
        Ok(Some(CompletionResponse::Array(items)))
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("lethe-lsp {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lethe_lsp=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("starting lethe-lsp");

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(LetheLanguageServer::new);
    Server::new(stdin, stdout, socket).serve(service).await;
}
