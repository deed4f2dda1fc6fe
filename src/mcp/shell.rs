use std::future::Future;

use rmcp::model::{
    AnnotateAble, Implementation, ListResourcesResult, PaginatedRequestParam, RawResource,
    ReadResourceRequestParam, ReadResourceResult, ResourceContents, ServerCapabilities, ServerInfo,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{Error as McpError, ServerHandler, ServiceExt, tool};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct FaersLensServer;

const RESOURCE_HELP_URI: &str = "faers-lens://help";
const MAX_COMMAND_LEN: usize = 1024;

const SHELL_DESCRIPTION: &str = "\
Run a read-only faers-lens command against FDA FAERS adverse event reports (openFDA).

Commands:
  top-events -d <drug> [-n 10]
  serious-outcomes -d <drug> [-n 6]
  event-stats -d <drug> -e <event>
  time-series -d <drug> -e <event> [--aggregation yearly|quarterly]
  report-sources -d <drug> [-n 5]
  reports -d <drug> [-e <event>] [-n 20]
  normalize <name>
  health

Filters: --sex all|male|female|unknown --min-age N --max-age N --since YYYY[-MM[-DD]] --until YYYY[-MM[-DD]]
Add --json for structured output. Brand names are mapped to generics (Advil -> ibuprofen).
Counts are spontaneous reports, not incidence rates.";

fn is_allowed_mcp_command(args: &[String]) -> bool {
    // args[0] is the binary name ("faers-lens")
    let Some(cmd) = args.get(1).map(|s| s.trim().to_ascii_lowercase()) else {
        return false;
    };
    let cmd = if cmd == "--json" {
        match args.get(2) {
            Some(next) => next.trim().to_ascii_lowercase(),
            None => return false,
        }
    } else {
        cmd
    };

    matches!(
        cmd.as_str(),
        "top-events"
            | "serious-outcomes"
            | "event-stats"
            | "time-series"
            | "report-sources"
            | "reports"
            | "normalize"
            | "health"
            | "help"
            | "--help"
            | "--version"
    )
}

#[tool(tool_box)]
impl FaersLensServer {
    #[tool(description = SHELL_DESCRIPTION)]
    async fn shell(&self, #[tool(param)] command: String) -> Result<String, String> {
        if command.len() > MAX_COMMAND_LEN {
            return Err("Error: command is too long".to_string());
        }

        let split = match shlex::split(&command) {
            Some(args) => args,
            None => return Err(format!("Error: Invalid command syntax: {command}")),
        };

        let mut args = vec!["faers-lens".to_string()];
        if split.first().is_some_and(|s| s == "faers-lens") {
            args.extend(split.into_iter().skip(1));
        } else {
            args.extend(split);
        }

        if !is_allowed_mcp_command(&args) {
            return Err(
                "Error: MCP shell allows the analytical commands only (top-events/serious-outcomes/event-stats/time-series/report-sources/reports/normalize/health)."
                    .to_string(),
            );
        }

        crate::cli::execute(args)
            .await
            .map_err(|e| format!("Error: {e}"))
    }
}

#[tool(tool_box)]
impl ServerHandler for FaersLensServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "faers-lens".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: Some(
                "faers-lens summarizes FDA adverse event reports (FAERS via openFDA): top events, \
                 serious outcomes, drug-event frequency, report trends, and reporter types. \
                 Use the `shell` tool to run faers-lens commands. \
                 Read faers-lens://help for a command reference."
                    .to_string(),
            ),
            ..Default::default()
        }
    }

    fn list_resources(
        &self,
        _request: PaginatedRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListResourcesResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListResourcesResult {
            next_cursor: None,
            resources: build_resource_list()
                .into_iter()
                .map(|r| r.no_annotation())
                .collect(),
        }))
    }

    fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ReadResourceResult, McpError>> + Send + '_ {
        std::future::ready(read_resource_markdown(&request.uri))
    }
}

fn read_resource_markdown(uri: &str) -> Result<ReadResourceResult, McpError> {
    if uri == RESOURCE_HELP_URI {
        return Ok(to_resource_result(uri, crate::cli::OVERVIEW.to_string()));
    }

    Err(McpError::resource_not_found(
        format!("Unknown resource: {uri}"),
        None,
    ))
}

fn build_resource_list() -> Vec<RawResource> {
    vec![RawResource {
        uri: RESOURCE_HELP_URI.to_string(),
        name: "faers-lens Overview".to_string(),
        description: None,
        mime_type: Some("text/markdown".to_string()),
        size: None,
    }]
}

fn to_resource_result(uri: &str, content: String) -> ReadResourceResult {
    ReadResourceResult {
        contents: vec![ResourceContents::TextResourceContents {
            uri: uri.to_string(),
            mime_type: Some("text/markdown".to_string()),
            text: content,
        }],
    }
}

pub async fn run_stdio() -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    let cancel = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let running = FaersLensServer
        .serve_with_ct(rmcp::transport::stdio(), shutdown)
        .await?;
    let _reason = running.waiting().await?;
    Ok(())
}

pub async fn run_http(host: &str, port: u16) -> anyhow::Result<()> {
    use rmcp::transport::sse_server::SseServer;

    let ip: std::net::IpAddr = host
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid host address: {e}"))?;
    let bind = std::net::SocketAddr::new(ip, port);

    tracing::info!("faers-lens HTTP server listening on http://{bind}");
    tracing::info!("  SSE endpoint:  GET  http://{bind}/sse");
    tracing::info!("  Post endpoint: POST http://{bind}/message");

    let ct = SseServer::serve(bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind HTTP server: {e}"))?
        .with_service(|| FaersLensServer);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down…");
    ct.cancel();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{RESOURCE_HELP_URI, is_allowed_mcp_command, read_resource_markdown};

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn mcp_allowlist_admits_analytical_commands_only() {
        assert!(is_allowed_mcp_command(&args(&["faers-lens", "top-events", "-d", "x"])));
        assert!(is_allowed_mcp_command(&args(&["faers-lens", "--json", "event-stats"])));
        assert!(is_allowed_mcp_command(&args(&["faers-lens", "Health"])));
        assert!(!is_allowed_mcp_command(&args(&["faers-lens", "serve-http"])));
        assert!(!is_allowed_mcp_command(&args(&["faers-lens", "mcp"])));
        assert!(!is_allowed_mcp_command(&args(&["faers-lens", "--json"])));
        assert!(!is_allowed_mcp_command(&args(&["faers-lens"])));
    }

    #[test]
    fn help_resource_serves_overview() {
        let result = read_resource_markdown(RESOURCE_HELP_URI).unwrap();
        assert_eq!(result.contents.len(), 1);
        assert!(read_resource_markdown("faers-lens://nope").is_err());
    }
}
