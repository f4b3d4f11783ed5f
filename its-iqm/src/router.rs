//! The inter-queue manager router: relays messages between the local
//! broker's `inQueue` and `outQueue`/`interQueue`, and between each
//! neighbour's advertised queue and the local `outQueue`, running the
//! filter pipeline in both directions and rewriting topic prefixes as
//! messages cross from one queue to another.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};

use its_core::filter::{self, Filter, FilterChain, FilterType, RetainValue};
use its_core::mqtt::{MqttClient, MqttClientConfig};
use its_core::telemetry::{NoExportSpanFactory, OtelSpanFactory, SpanFactory};

use crate::authority::{self, NeighbourDescriptor, NeighbourMap};
use crate::config::{AuthorityConfig, Config, FilterSectionConfig};
use crate::error::{IqmError, Result};

/// The three well-known queue names, fully qualified with the instance's
/// prefix and suffix.
#[derive(Debug, Clone)]
struct Queues {
    in_queue: String,
    out_queue: String,
    interqueue: String,
}

fn qualify(prefix: &Option<String>, suffix: &Option<String>, queue: &str) -> String {
    let prefix = prefix.as_deref().map(|p| format!("{p}/")).unwrap_or_default();
    let suffix = suffix.as_deref().filter(|s| !s.is_empty()).map(|s| format!("/{s}")).unwrap_or_default();
    format!("{prefix}{queue}{suffix}")
}

/// The broker self-description published (with retain) on the `info`
/// topic, per spec.md §6.
fn info_payload(config: &Config) -> serde_json::Value {
    let timestamp = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0);
    serde_json::json!({
        "type": "broker",
        "version": its_core::VERSION,
        "instance_id": config.general.instance_id,
        "instance_type": config.general.instance_type,
        "running": true,
        "timestamp": timestamp,
        "validity_duration": config.general.info_period * 2,
    })
}

fn compile_filters(sections: &[FilterSectionConfig], instance_id: &str, prefix: &str, suffix: &str, queues: &Queues) -> Result<(FilterChain, FilterChain)> {
    let queue_pairs: Vec<(&str, &str)> = vec![("inQueue", &queues.in_queue), ("outQueue", &queues.out_queue), ("interQueue", &queues.interqueue)];

    let mut in_filters = Vec::new();
    let mut out_filters = Vec::new();

    for section in sections {
        let expand = |s: &str| Filter::expand_placeholders(s, instance_id, prefix, suffix, &queue_pairs);

        let (filter_type, lines, is_regex) = if let Some(raw) = &section.in_prefix {
            (FilterType::In, filter::split_pattern_lines(raw), false)
        } else if let Some(raw) = &section.in_regex {
            (FilterType::In, filter::split_pattern_lines(raw), true)
        } else if let Some(raw) = &section.out_prefix {
            (FilterType::Out, filter::split_pattern_lines(raw), false)
        } else if let Some(raw) = &section.out_regex {
            (FilterType::Out, filter::split_pattern_lines(raw), true)
        } else {
            return Err(IqmError::Config(format!("filter '{}' does not define patterns", section.name)));
        };

        let expanded_lines: Vec<String> = lines.iter().map(|l| expand(l)).collect();
        let matcher = if is_regex { filter::compile_regex_patterns(&expanded_lines).map_err(IqmError::from)? } else { filter::compile_prefix_patterns(&expanded_lines) };

        let retain_action = match &section.retain {
            Some(spec) => filter::parse_retain_spec(spec).map_err(IqmError::from)?,
            None => its_core::filter::RetainAction::Unchanged,
        };

        let compiled = Filter::new(section.name.clone(), filter_type, matcher, section.drop, retain_action);
        match filter_type {
            FilterType::In => in_filters.push(compiled),
            FilterType::Out => out_filters.push(compiled),
        }
    }

    Ok((FilterChain::new(in_filters), FilterChain::new(out_filters)))
}

struct RouteData {
    copy_from: String,
    copy_to: Vec<String>,
    target_cell: Arc<once_cell::sync::OnceCell<Arc<MqttClient>>>,
}

/// Wires one MQTT connection's incoming messages through the shared
/// in/out filter chains and republishes them on the route's target (the
/// local broker's client for a neighbour's inbound traffic, or a
/// neighbour's client for the local broker's own outbound traffic).
fn make_copy_callback(route: RouteData, in_filters: Arc<FilterChain>, out_filters: Arc<FilterChain>) -> Arc<dyn Fn(&str, &[u8]) + Send + Sync> {
    let target_cell = route.target_cell;
    Arc::new(move |topic: &str, payload: &[u8]| {
        let Some(retain) = in_filters.apply(topic, payload, RetainValue::default()) else {
            debug!("router: in-filter dropped message on {topic}");
            return;
        };
        let Some(target_client) = target_cell.get().cloned() else {
            warn!("router: dropping message on {topic}: publish target not ready");
            return;
        };
        for destination in &route.copy_to {
            let Some(suffix) = topic.strip_prefix(route.copy_from.as_str()) else {
                warn!("router: {topic} doesn't start with expected prefix {}", route.copy_from);
                continue;
            };
            let new_topic = format!("{destination}{suffix}");
            let Some(final_retain) = out_filters.apply(&new_topic, payload, retain.clone()) else {
                debug!("router: out-filter dropped message destined for {new_topic}");
                continue;
            };
            let retain_bool = final_retain.is_retained();
            let target_client = target_client.clone();
            let payload = payload.to_vec();
            let new_topic = new_topic.clone();
            tokio::spawn(async move {
                target_client.publish(&new_topic, payload, retain_bool).await;
            });
        }
    })
}

struct NeighbourHandle {
    descriptor: NeighbourDescriptor,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

/// The running router: owns the local broker connection, the compiled
/// filter chains, and the set of currently connected neighbours.
pub struct Router {
    config: Config,
    queues: Queues,
    in_filters: Arc<FilterChain>,
    out_filters: Arc<FilterChain>,
    span_factory: Arc<dyn SpanFactory>,
    neighbours: Mutex<HashMap<String, NeighbourHandle>>,
}

impl Router {
    pub fn new(config: Config) -> Result<Arc<Router>> {
        let prefix = config.general.prefix.clone().unwrap_or_default();
        let suffix = config.general.suffix.clone().unwrap_or_default();
        let queues = Queues {
            in_queue: qualify(&config.general.prefix, &config.general.suffix, "inQueue"),
            out_queue: qualify(&config.general.prefix, &config.general.suffix, "outQueue"),
            interqueue: qualify(&config.general.prefix, &config.general.suffix, &config.local.interqueue),
        };

        let (in_filters, out_filters) = compile_filters(&config.filters, &config.general.instance_id, &prefix, &suffix, &queues)?;

        let span_factory: Arc<dyn SpanFactory> = match &config.telemetry.endpoint {
            Some(endpoint) => OtelSpanFactory::spawn(config.general.instance_id.clone(), endpoint.clone(), std::time::Duration::from_secs(5)) as Arc<dyn SpanFactory>,
            None => Arc::new(NoExportSpanFactory) as Arc<dyn SpanFactory>,
        };

        Ok(Arc::new(Router {
            config,
            queues,
            in_filters: Arc::new(in_filters),
            out_filters: Arc::new(out_filters),
            span_factory,
            neighbours: Mutex::new(HashMap::new()),
        }))
    }

    /// Run the local broker connection and the central authority feed
    /// until `subsys` asks for shutdown.
    pub async fn run(self: Arc<Self>, subsys: SubsystemHandle) -> anyhow::Result<()> {
        let local_config = MqttClientConfig {
            client_id: self.config.local.client_id.clone(),
            host: self.config.local.host.clone(),
            port: self.config.local.port,
            socket_path: self.config.local.socket_path.clone(),
            username: self.config.local.username.clone(),
            password: self.config.local.password.clone(),
            transport: if self.config.local.socket_path.is_some() { its_core::mqtt::Transport::Unix } else { its_core::mqtt::Transport::Tcp },
            tls: None,
        };

        // The local client both receives `inQueue` traffic and is the
        // publish target the copy callback forwards onto (`outQueue` and
        // the local `interQueue` branch): it forwards to itself. Since the
        // callback must be supplied at construction time but needs a
        // handle to the very client it is wired into, the target is
        // threaded through a cell the callback only reads after the
        // client exists; the event loop isn't polled until it is spawned
        // below, so there is no race between setting the cell and the
        // first delivered message.
        let target_cell: Arc<once_cell::sync::OnceCell<Arc<MqttClient>>> = Arc::new(once_cell::sync::OnceCell::new());
        let route = RouteData {
            copy_from: self.queues.in_queue.clone(),
            copy_to: vec![self.queues.out_queue.clone(), self.queues.interqueue.clone()],
            target_cell: target_cell.clone(),
        };
        let callback = make_copy_callback(route, self.in_filters.clone(), self.out_filters.clone());

        let (local_client, local_loop) = MqttClient::new(local_config, callback, self.span_factory.clone());
        let local_client = Arc::new(local_client);
        target_cell.set(local_client.clone()).ok();

        info!("local queue manager starting for {}", self.config.local.client_id);
        let in_queue = self.queues.in_queue.clone();
        let local_client_for_sub = local_client.clone();
        subsys.start(SubsystemBuilder::new("iqm-local", move |_| async move {
            local_client_for_sub.wait_for_ready().await;
            local_client_for_sub.subscribe(&[format!("{in_queue}/#")]).await.ok();
            Ok::<(), anyhow::Error>(())
        }));

        subsys.start(SubsystemBuilder::new("iqm-local-loop", move |h| async move {
            tokio::select! {
                _ = h.on_shutdown_requested() => {}
                _ = local_loop => {}
            }
            Ok::<(), anyhow::Error>(())
        }));

        let info_topic = match &self.config.general.prefix {
            Some(prefix) => format!("{prefix}/info/{}", self.config.general.instance_id),
            None => format!("info/{}", self.config.general.instance_id),
        };
        let info_period = self.config.general.info_period.max(1);
        let info_client = local_client.clone();
        let this_for_info = self.clone();
        subsys.start(SubsystemBuilder::new("iqm-info", move |h| async move {
            info_client.wait_for_ready().await;
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(info_period));
            loop {
                tokio::select! {
                    _ = h.on_shutdown_requested() => break,
                    _ = ticker.tick() => {
                        let payload = info_payload(&this_for_info.config).to_string();
                        info_client.publish(&info_topic, payload.into_bytes(), true).await;
                    }
                }
            }
            Ok::<(), anyhow::Error>(())
        }));

        let (authority_tx, mut authority_rx) = mpsc::unbounded_channel();
        let authority_config = self.config.authority.clone();
        subsys.start(SubsystemBuilder::new("iqm-authority", move |_| async move {
            authority::run(authority_config, authority_tx).await;
            Ok::<(), anyhow::Error>(())
        }));

        let this = self.clone();
        subsys.start(SubsystemBuilder::new("iqm-neighbours", move |h| async move {
            loop {
                tokio::select! {
                    _ = h.on_shutdown_requested() => break,
                    Some(loaded) = authority_rx.recv() => {
                        this.reconcile_neighbours(loaded, local_client.clone()).await;
                    }
                }
            }
            Ok::<(), anyhow::Error>(())
        }));

        subsys.on_shutdown_requested().await;
        Ok(())
    }

    /// Stop neighbours no longer present (or whose descriptor changed) and
    /// start any new ones, mirroring the central authority's
    /// `update_cb(loaded_directory)` contract: stop before start.
    async fn reconcile_neighbours(&self, loaded: NeighbourMap, local_client: Arc<MqttClient>) {
        let mut neighbours = self.neighbours.lock();

        let to_stop: Vec<String> = neighbours
            .iter()
            .filter(|(id, handle)| loaded.get(*id).map(|d| d != &handle.descriptor).unwrap_or(true))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &to_stop {
            if let Some(handle) = neighbours.remove(id) {
                let _ = handle.shutdown_tx.send(());
                info!("stopped neighbour {id}");
            }
        }

        let to_start: Vec<(String, NeighbourDescriptor)> = loaded
            .iter()
            .filter(|(id, desc)| neighbours.get(*id).map(|h| &h.descriptor != *desc).unwrap_or(true))
            .map(|(id, desc)| (id.clone(), desc.clone()))
            .collect();

        for (id, descriptor) in to_start {
            match self.start_neighbour(&id, &descriptor, local_client.clone()) {
                Ok(handle) => {
                    neighbours.insert(id.clone(), handle);
                    info!("started neighbour {id}");
                }
                Err(e) => error!("failed to start neighbour {id}: {e}"),
            }
        }
    }

    fn start_neighbour(&self, id: &str, descriptor: &NeighbourDescriptor, local_client: Arc<MqttClient>) -> Result<NeighbourHandle> {
        let n_type = descriptor.get("type").cloned().unwrap_or_default();
        if n_type != "mqtt" {
            return Err(IqmError::UnsupportedNeighbourType(n_type, id.to_string()));
        }
        let host = descriptor.get("host").cloned().ok_or_else(|| IqmError::Config(format!("neighbour {id} missing host")))?;
        let port: u16 = descriptor.get("port").and_then(|p| p.parse().ok()).ok_or_else(|| IqmError::Config(format!("neighbour {id} missing/invalid port")))?;
        let queue = descriptor.get("queue").cloned().ok_or_else(|| IqmError::Config(format!("neighbour {id} missing queue")))?;
        let prefix = descriptor.get("prefix").cloned().or_else(|| self.config.general.prefix.clone());
        let suffix = descriptor.get("suffix").cloned().or_else(|| self.config.general.suffix.clone());
        let interqueue = qualify(&prefix, &suffix, &queue);

        let neighbour_config = MqttClientConfig::tcp(self.config.neighbours.client_id.clone(), host, port)
            .credentials(descriptor.get("username").cloned(), descriptor.get("password").cloned());

        let target_cell = Arc::new(once_cell::sync::OnceCell::new());
        target_cell.set(local_client).ok();
        let route = RouteData { copy_from: interqueue.clone(), copy_to: vec![self.queues.out_queue.clone()], target_cell };
        let callback = make_copy_callback(route, self.in_filters.clone(), self.out_filters.clone());

        let (client, event_loop) = MqttClient::new(neighbour_config, callback, self.span_factory.clone());
        let client = Arc::new(client);
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let sub_client = client.clone();
        let sub_topic = format!("{interqueue}/#");
        tokio::spawn(async move {
            sub_client.wait_for_ready().await;
            let _ = sub_client.subscribe(&[sub_topic]).await;
        });

        tokio::spawn(async move {
            tokio::select! {
                _ = event_loop => {}
                _ = shutdown_rx => {}
            }
        });

        Ok(NeighbourHandle { descriptor: descriptor.clone(), shutdown_tx })
    }
}
