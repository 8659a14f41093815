use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use rival_client::{
    BingEngine, DuckDuckGoEngine, ExtractionPipeline, HtmdCleaner, ReqwestTransport, WsConnector,
    YahooEngine,
};
use rival_core::models::{FetchOptions, SearchOptions, Technique, TraversalMode, TraversalRequest};
use rival_core::pagination::{self, PageQuery, PaginationManager};
use rival_core::retrieve::{RetrievalInput, RetrievalOptions, Retriever};
use rival_core::stream::StreamRetriever;
use rival_core::throttle::{ThrottleConfig, ThrottledFetcher};
use rival_core::traits::{Extractor, Fetcher, SearchEngine};
use rival_core::{
    BypassFetcher, CircuitBreakerRegistry, LlmsDocument, RivalConfig, RotationRegistry,
    SearchOrchestrator, Traverser,
};

#[derive(Parser)]
#[command(name = "rival", version, about = "Resilient content retrieval, search and traversal")]
struct Cli {
    /// Allow requests to private/loopback addresses
    #[arg(long, global = true, default_value_t = false)]
    allow_private_urls: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one page, bypassing blocks, and extract its main content
    Fetch {
        /// Target URL
        url: String,

        /// Print the raw body instead of extracted content
        #[arg(long, default_value_t = false)]
        raw: bool,
    },

    /// Retrieve a URL, a batch of URLs, `search:<query>`, or a ws:// stream
    Retrieve {
        /// One or more URLs, a single `search:<query>`, or a single ws(s):// URL
        #[arg(required = true)]
        input: Vec<String>,

        /// Maximum URLs fetched (or search results returned)
        #[arg(short, long, default_value_t = 5)]
        limit: usize,

        /// Maximum characters of text per page
        #[arg(short = 'm', long, default_value_t = 2000)]
        max_length: usize,
    },

    /// Search across engines with circuit-broken fallback
    Search {
        query: String,

        /// Number of results to gather
        #[arg(short, long, default_value_t = 10)]
        count: usize,

        #[arg(long)]
        language: Option<String>,

        #[arg(long)]
        region: Option<String>,

        /// Only consult the primary engine
        #[arg(long, default_value_t = false)]
        no_fallback: bool,

        #[command(flatten)]
        page: PageArgs,
    },

    /// Crawl breadth-first from a root URL
    Traverse {
        url: String,

        /// research, docs or map
        #[arg(long, default_value = "research")]
        mode: TraversalMode,

        #[arg(long, default_value_t = 2)]
        max_depth: u32,

        #[arg(long, default_value_t = 5)]
        max_pages: usize,

        /// Follow links to other domains too
        #[arg(long, default_value_t = false)]
        all_domains: bool,

        /// Minimum delay between requests to the same host, in milliseconds
        #[arg(long, env = "RIVAL_CRAWL_DELAY_MS", default_value_t = 1000)]
        delay_ms: u64,

        #[command(flatten)]
        page: PageArgs,
    },

    /// Capture messages from a WebSocket feed (best effort)
    Stream {
        /// ws:// or wss:// URL
        url: String,

        /// Stop after this many messages
        #[arg(short = 'n', long)]
        max_chunks: Option<usize>,
    },

    /// Crawl a documentation site and render llms.txt
    Llms {
        url: String,

        /// Project name for the H1 (defaults to the host)
        #[arg(long)]
        name: Option<String>,

        /// One-line summary for the blockquote
        #[arg(long, default_value = "")]
        description: String,

        #[arg(long, default_value_t = 2)]
        max_depth: u32,

        #[arg(long, default_value_t = 20)]
        max_pages: usize,

        /// Which file to render
        #[arg(long, value_enum, default_value_t = LlmsFormat::Index)]
        format: LlmsFormat,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<std::path::PathBuf>,

        #[arg(long, env = "RIVAL_CRAWL_DELAY_MS", default_value_t = 1000)]
        delay_ms: u64,
    },

    /// Decode a pagination cursor and report whether it is still valid
    Cursor { cursor: String },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum LlmsFormat {
    /// llms.txt
    Index,
    /// llms-full.txt
    Full,
    /// llms-ctx.txt
    Ctx,
    /// llms-ctx-full.txt
    CtxFull,
}

#[derive(clap::Args)]
struct PageArgs {
    /// Items per page
    #[arg(long)]
    limit: Option<usize>,

    /// Cursor from a previous page's `nextCursor`
    #[arg(long)]
    cursor: Option<String>,
}

type Fetch = BypassFetcher<ReqwestTransport>;
type Extract = ExtractionPipeline<HtmdCleaner>;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("rival=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = RivalConfig::from_env().context("Invalid RIVAL_* configuration")?;
    let allow_private = cli.allow_private_urls || config.allow_private_urls;

    let fetcher = build_fetcher(&config, allow_private)?;
    let extractor = ExtractionPipeline::new(HtmdCleaner::new()).with_threshold(config.extraction_threshold);
    let pagination = PaginationManager::new(config.cursor_secret.as_bytes())
        .with_config(config.pagination.clone());

    match cli.command {
        Commands::Fetch { url, raw } => cmd_fetch(&fetcher, &extractor, &url, raw).await?,
        Commands::Retrieve {
            input,
            limit,
            max_length,
        } => {
            let search = build_search(&config, &fetcher);
            let stream = build_stream(&config, allow_private);
            let retriever = Retriever::new(fetcher, extractor)
                .with_search(search)
                .with_stream(stream)
                .with_workers(config.traversal.workers);
            cmd_retrieve(&retriever, input, limit, max_length).await?;
        }
        Commands::Search {
            query,
            count,
            language,
            region,
            no_fallback,
            page,
        } => {
            let options = SearchOptions {
                count,
                language,
                region,
                enable_fallback: !no_fallback,
            };
            let search = build_search(&config, &fetcher);
            cmd_search(&search, &pagination, &query, &options, page).await?;
        }
        Commands::Traverse {
            url,
            mode,
            max_depth,
            max_pages,
            all_domains,
            delay_ms,
            page,
        } => {
            let request = TraversalRequest {
                root_url: url,
                mode,
                max_depth,
                max_pages,
                same_domain_only: !all_domains,
            };
            let throttled = ThrottledFetcher::new(fetcher, throttle_config(delay_ms));
            let traverser = Traverser::new(throttled, extractor, config.traversal.clone());
            cmd_traverse(&traverser, &pagination, &request, page).await?;
        }
        Commands::Stream { url, max_chunks } => {
            let stream = build_stream(&config, allow_private);
            let capture = stream
                .capture(&url, max_chunks)
                .await
                .with_context(|| format!("Failed to open stream {url}"))?;
            print_json(&capture)?;
        }
        Commands::Llms {
            url,
            name,
            description,
            max_depth,
            max_pages,
            format,
            output,
            delay_ms,
        } => {
            let request = TraversalRequest {
                root_url: url,
                mode: TraversalMode::Docs,
                max_depth,
                max_pages,
                same_domain_only: true,
            };
            let throttled = ThrottledFetcher::new(fetcher, throttle_config(delay_ms));
            let traverser = Traverser::new(throttled, extractor, config.traversal.clone());
            cmd_llms(&traverser, &request, name, &description, format, output).await?;
        }
        Commands::Cursor { cursor } => {
            print_json(&pagination.describe(&cursor))?;
        }
    }

    Ok(())
}

fn build_fetcher(config: &RivalConfig, allow_private: bool) -> Result<Fetch> {
    let mut transport = ReqwestTransport::new().context("Failed to create HTTP client")?;
    if allow_private {
        transport = transport.allow_private_urls();
    }
    let rotation = RotationRegistry::new(config.user_agents.clone(), config.proxies.clone());
    tracing::debug!(
        proxies = rotation.healthy_proxy_count(),
        archives = config.bypass.archives.len(),
        "Fetcher ready"
    );
    Ok(BypassFetcher::new(transport, rotation, config.bypass.clone()))
}

fn build_stream(config: &RivalConfig, allow_private: bool) -> StreamRetriever {
    let mut connector = WsConnector::new();
    if allow_private {
        connector = connector.allow_private_urls();
    }
    StreamRetriever::new(Arc::new(connector), config.stream.clone())
}

fn throttle_config(delay_ms: u64) -> ThrottleConfig {
    ThrottleConfig::new(std::time::Duration::from_millis(delay_ms))
        .with_jitter(std::time::Duration::from_millis(delay_ms / 2))
}

fn build_search(config: &RivalConfig, fetcher: &Fetch) -> SearchOrchestrator {
    let fetcher = fetcher.without_archives();
    let options = FetchOptions::default().with_timeout(config.search.engine_timeout);
    let engines: Vec<Arc<dyn SearchEngine>> = vec![
        Arc::new(DuckDuckGoEngine::new(fetcher.clone()).with_fetch_options(options.clone())),
        Arc::new(BingEngine::new(fetcher.clone()).with_fetch_options(options.clone())),
        Arc::new(YahooEngine::new(fetcher.clone()).with_fetch_options(options)),
    ];
    SearchOrchestrator::new(
        engines,
        CircuitBreakerRegistry::new(config.breaker.clone()),
        config.search.clone(),
    )
}

#[derive(Serialize)]
struct FetchReport<'a> {
    url: &'a str,
    final_url: &'a str,
    status: u16,
    technique: Technique,
    attempts: u32,
    latency_ms: u64,
    content: rival_core::ExtractedContent,
}

async fn cmd_fetch(fetcher: &Fetch, extractor: &Extract, url: &str, raw: bool) -> Result<()> {
    tracing::info!(url = %url, "Fetching");
    let page = fetcher
        .fetch(url, &FetchOptions::default())
        .await
        .with_context(|| format!("Failed to fetch {url}"))?;

    tracing::info!(
        technique = %page.technique,
        attempts = page.attempts,
        bytes = page.body.len(),
        "Fetched"
    );

    if raw {
        println!("{}", page.body);
        return Ok(());
    }

    let mut content = extractor.extract(&page);
    content.links = extractor.extract_links(&page).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Link extraction failed");
        Vec::new()
    });
    print_json(&FetchReport {
        url: &page.url,
        final_url: &page.final_url,
        status: page.status,
        technique: page.technique,
        attempts: page.attempts,
        latency_ms: page.latency_ms,
        content,
    })
}

async fn cmd_retrieve(
    retriever: &Retriever<Fetch, Extract>,
    input: Vec<String>,
    limit: usize,
    max_length: usize,
) -> Result<()> {
    let input = match <[String; 1]>::try_from(input) {
        Ok([single]) => RetrievalInput::parse(&single),
        Err(many) => RetrievalInput::Urls(many),
    };

    let output = retriever
        .retrieve(&input, &RetrievalOptions { limit, max_length })
        .await
        .context("Retrieval failed")?;
    print_json(&output)
}

async fn cmd_search(
    search: &SearchOrchestrator,
    pagination: &PaginationManager,
    query: &str,
    options: &SearchOptions,
    page: PageArgs,
) -> Result<()> {
    let results = search
        .search(query, options)
        .await
        .with_context(|| format!("Search for '{query}' failed"))?;

    for stats in search.breakers().stats() {
        tracing::debug!(circuit = %stats.name, state = ?stats.state, "Breaker state");
    }

    let signature = pagination::signature(&serde_json::json!({
        "query": query.trim(),
        "count": options.count,
        "language": options.language,
        "region": options.region,
        "fallback": options.enable_fallback,
    }));
    let page_query = PageQuery::new(page.limit, page.cursor).with_filter_signature(signature);
    print_json(&pagination.paginate_with(&results, &page_query))
}

async fn cmd_traverse<F, E>(
    traverser: &Traverser<F, E>,
    pagination: &PaginationManager,
    request: &TraversalRequest,
    page: PageArgs,
) -> Result<()>
where
    F: Fetcher + 'static,
    E: Extractor + 'static,
{
    let report = traverser
        .traverse(request)
        .await
        .with_context(|| format!("Traversal from {} failed", request.root_url))?;

    tracing::info!(
        pages = report.pages.len(),
        failed = report.failed.len(),
        depth = report.max_depth_reached,
        timed_out = report.timed_out,
        "Traversal finished"
    );
    for failure in &report.failed {
        tracing::warn!(url = %failure.url, depth = failure.depth, reason = %failure.reason, "Page failed");
    }

    let signature = pagination::signature(&serde_json::json!({
        "root": report.root_url,
        "mode": request.mode.to_string(),
        "max_depth": request.max_depth,
        "max_pages": request.max_pages,
        "same_domain_only": request.same_domain_only,
    }));
    let page_query = PageQuery::new(page.limit, page.cursor).with_filter_signature(signature);
    print_json(&pagination.paginate_with(&report.pages, &page_query))
}

async fn cmd_llms<F, E>(
    traverser: &Traverser<F, E>,
    request: &TraversalRequest,
    name: Option<String>,
    description: &str,
    format: LlmsFormat,
    output: Option<std::path::PathBuf>,
) -> Result<()>
where
    F: Fetcher + 'static,
    E: Extractor + 'static,
{
    let report = traverser
        .traverse(request)
        .await
        .with_context(|| format!("Traversal from {} failed", request.root_url))?;
    if report.timed_out {
        tracing::warn!(
            pages = report.pages.len(),
            "Crawl hit its deadline, rendering what was collected"
        );
    }

    let name = name.unwrap_or_else(|| host_of(&report.root_url).to_string());
    let document = LlmsDocument::from_report(&report, &name, description);
    let rendered = match format {
        LlmsFormat::Index => document.render_index(),
        LlmsFormat::Full => document.render_full(),
        LlmsFormat::Ctx => document.render_ctx(false),
        LlmsFormat::CtxFull => document.render_ctx(true),
    };

    match output {
        Some(path) => {
            std::fs::write(&path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), pages = document.page_count(), "Wrote llms file");
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

/// The authority part of an absolute URL, or the input unchanged.
fn host_of(url: &str) -> &str {
    url.split_once("://")
        .map(|(_, rest)| rest.split(['/', '?', '#']).next().unwrap_or(rest))
        .unwrap_or(url)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}
