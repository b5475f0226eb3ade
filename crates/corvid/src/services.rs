//! Wiring from [`Settings`] to backends, tools and pipeline services.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use corvid_agent::{
    AgentConfig, BuiltinToolsConfig, HttpToolConfig, RetrievalServices, SqlBackend, StrategyKind,
    ToolRegistry, builtin_registry,
};
use corvid_config::Settings;
use corvid_guard::EgressGuard;
use corvid_llm::{
    HttpVectorIndex, OpenAiConfig, OpenAiEmbedder, OpenAiEmbedderConfig, SharedBackend,
    create_shared_backend,
};
use corvid_pipeline::{DegradationMonitor, NodeServices};

/// The completion backend described by `[llm]`.
pub fn llm_backend(settings: &Settings) -> Result<SharedBackend> {
    let llm = &settings.llm;
    let mut config = OpenAiConfig::compatible(&llm.base_url)
        .with_name("llm")
        .with_timeout(Duration::from_secs(llm.timeout_secs))
        .with_max_retries(llm.max_retries)
        .with_retry_backoff(Duration::from_millis(llm.retry_backoff_ms))
        .with_verify_tls(settings.tls.verify);
    if let Some(key) = &llm.api_key {
        config = config.with_api_key(key);
    }
    create_shared_backend(config).context("failed to create the LLM backend")
}

/// Embedder and vector index, when both endpoints are configured.
pub fn retrieval(settings: &Settings) -> Result<Option<RetrievalServices>> {
    let (Some(embed_url), Some(vector_url)) =
        (&settings.embedding.base_url, &settings.vector.base_url)
    else {
        tracing::debug!("Retrieval disabled; embedding or vector endpoint not configured");
        return Ok(None);
    };

    let mut embed_config = OpenAiEmbedderConfig::new(embed_url)
        .with_model(&settings.embedding.model)
        .with_dimensions(settings.embedding.dimensions)
        .with_verify_tls(settings.tls.verify);
    if let Some(key) = settings.embedding_api_key() {
        embed_config = embed_config.with_api_key(key);
    }
    let embedder = OpenAiEmbedder::new(embed_config).context("failed to create the embedder")?;
    let index = HttpVectorIndex::new(
        vector_url,
        Duration::from_secs(settings.vector.timeout_secs),
        settings.tls.verify,
    )
    .context("failed to create the vector index client")?;

    Ok(Some(RetrievalServices {
        embedder: Arc::new(embedder),
        index: Arc::new(index),
        collection: settings.vector.collection.clone(),
        top_k: settings.vector.top_k as u64,
    }))
}

fn sql_backend(settings: &Settings) -> Result<SqlBackend> {
    if !settings.sql.database_url.trim().is_empty() {
        return SqlBackend::from_url(&settings.sql.database_url)
            .context("invalid sql.database_url");
    }
    Ok(if settings.sql.mock_data {
        SqlBackend::Mock
    } else {
        SqlBackend::Disabled
    })
}

/// Built-in tool wiring. `llm` enables `text_to_sql`.
pub fn tools_config(settings: &Settings, llm: Option<SharedBackend>) -> Result<BuiltinToolsConfig> {
    let http = &settings.http_tool;
    let mut config = BuiltinToolsConfig {
        production: settings.is_production(),
        egress: EgressGuard::new().with_allowed_domains(http.allowed_domains.iter().cloned()),
        http: HttpToolConfig {
            timeout_ceiling: Duration::from_secs(http.timeout_ceiling_secs),
            max_redirects: http.max_redirects,
            max_response_bytes: http.max_response_bytes,
            verify_tls: settings.tls.verify,
            ..HttpToolConfig::default()
        },
        sql_backend: sql_backend(settings)?,
        sql_max_rows: settings.sql.max_rows,
        sql_timeout: Duration::from_secs(settings.sql.timeout_secs),
        ..BuiltinToolsConfig::default()
    };
    if let Some(llm) = llm {
        config = config.with_llm(llm, &settings.llm.model);
    }
    if let Some(retrieval) = retrieval(settings)? {
        config = config.with_retrieval(retrieval);
    }
    Ok(config)
}

pub fn tool_registry(settings: &Settings, llm: Option<SharedBackend>) -> Result<ToolRegistry> {
    Ok(builtin_registry(tools_config(settings, llm)?))
}

pub fn agent_config(settings: &Settings) -> AgentConfig {
    let mut config = AgentConfig::new(&settings.llm.model)
        .with_max_tokens(settings.llm.max_tokens)
        .with_temperature(settings.llm.temperature)
        .with_max_iterations(settings.agent.max_iterations)
        .with_observation_max_chars(settings.agent.observation_max_chars)
        .with_llm_retries(
            settings.llm.max_retries,
            Duration::from_millis(settings.llm.retry_backoff_ms),
        );
    if let Some(prompt) = &settings.agent.system_prompt {
        config = config.with_system_prompt(prompt);
    }
    config
}

pub fn default_strategy(settings: &Settings) -> Result<StrategyKind> {
    settings
        .agent
        .strategy
        .parse()
        .map_err(|e: String| anyhow::anyhow!("agent.strategy: {e}"))
}

/// Services for pipeline nodes.
pub fn node_services(settings: &Settings) -> Result<NodeServices> {
    let llm = llm_backend(settings)?;
    let tools = tool_registry(settings, Some(llm.clone()))?;

    let mut services = NodeServices::new()
        .with_llm(llm)
        .with_tools(tools)
        .with_agent_config(agent_config(settings))
        .with_collection(&settings.vector.collection, settings.vector.top_k)
        .with_monitor(Arc::new(DegradationMonitor::new(
            settings.retrieval.degradation_alert_threshold,
        )));
    if let Some(retrieval) = retrieval(settings)? {
        services = services.with_retrieval(retrieval.embedder, retrieval.index);
    }
    Ok(services)
}
