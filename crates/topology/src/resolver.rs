//! 토폴로지 해석기: 유닛 선언을 큐 그래프로 변환
//!
//! 처리 순서:
//! 1. 유닛마다 기본값 병합
//! 2. 목적지 해석 (기본 목적지는 라우팅 키 `"*"`)
//! 3. 그래프 검증 (순환, Collector 도달 가능성)
//!
//! 위반 사항은 모두 수집하여 한 번에 반환하며, 에러가 하나라도 있으면 계획을 만들지 않습니다.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use ironbot_core::defaults::{EffectiveUnitConfig, merge};
use ironbot_core::error::ResolutionError;
use ironbot_core::metrics as m;
use ironbot_core::unit::{ENTRY_GROUP, PipelineConfig, UnitId};
use metrics::counter;
use tracing::{debug, warn};

use crate::plan::{Edge, PipelinePlan, ResolvedUnit};

type Graph<'a> = BTreeMap<&'a str, BTreeSet<&'a str>>;

/// 구성 문서를 해석하여 파이프라인 계획을 만듭니다.
///
/// 같은 입력에는 항상 같은 계획(지문 포함) 또는 같은 순서의 에러 목록을 돌려줍니다.
pub fn resolve(config: &PipelineConfig) -> Result<PipelinePlan, Vec<ResolutionError>> {
    counter!(m::RESOLUTIONS_TOTAL).increment(1);

    let mut errors = Vec::new();
    let mut units = BTreeMap::new();

    for (id, spec) in &config.units {
        let unit = id.to_string();

        if !id.is_valid() {
            errors.push(ResolutionError::InvalidUnitId { unit: unit.clone() });
        }
        if spec.module.trim().is_empty() {
            errors.push(ResolutionError::EmptyModule { unit: unit.clone() });
        }

        let effective = match merge(&config.defaults, spec) {
            Ok(effective) => effective,
            Err(e) => {
                errors.push(ResolutionError::Config {
                    unit: unit.clone(),
                    reason: e.to_string(),
                });
                EffectiveUnitConfig::default()
            }
        };

        let mut edges = Vec::new();
        let mut self_loop_reported = false;
        for (routing_key, target) in spec.destinations.routes() {
            if routing_key.trim().is_empty() {
                errors.push(ResolutionError::EmptyRoutingKey { unit: unit.clone() });
                continue;
            }
            if !config.units.contains_key(target.as_str()) {
                errors.push(ResolutionError::DanglingDestination {
                    unit: unit.clone(),
                    routing_key,
                    target: target.to_string(),
                });
                continue;
            }
            if target == *id && !config.allow_cycles && !self_loop_reported {
                errors.push(ResolutionError::SelfLoop { unit: unit.clone() });
                self_loop_reported = true;
            }
            edges.push(Edge {
                queue: target.source_queue(),
                routing_key,
                target,
            });
        }

        units.insert(
            id.clone(),
            ResolvedUnit {
                id: id.clone(),
                group: spec.group.clone(),
                module: spec.module.clone(),
                description: spec.description.clone(),
                enabled: spec.enabled,
                parameters: effective.parameters,
                rate_limit: effective.rate_limit,
                source_queue: id.source_queue(),
                internal_queue: id.internal_queue(),
                edges,
            },
        );
    }

    let graph = build_graph(&units);

    if !config.allow_cycles {
        errors.extend(
            find_cycles(&graph)
                .into_iter()
                .map(|path| ResolutionError::Cycle { path }),
        );
    }

    errors.extend(
        unreachable_units(&units, &graph)
            .into_iter()
            .map(|unit| ResolutionError::Unreachable { unit }),
    );

    if !errors.is_empty() {
        counter!(m::RESOLUTION_ERRORS_TOTAL).increment(errors.len() as u64);
        warn!(errors = errors.len(), "pipeline resolution failed");
        return Err(errors);
    }

    let plan = PipelinePlan::new(units, config.allow_cycles);
    debug!(
        units = plan.len(),
        fingerprint = plan.fingerprint(),
        "pipeline resolved"
    );
    Ok(plan)
}

fn build_graph(units: &BTreeMap<UnitId, ResolvedUnit>) -> Graph<'_> {
    units
        .values()
        .map(|u| {
            let targets = u.edges.iter().map(|e| e.target.as_str()).collect();
            (u.id.as_str(), targets)
        })
        .collect()
}

/// Collector에서 출발해 도달할 수 없는 유닛 (정렬됨)
fn unreachable_units(
    units: &BTreeMap<UnitId, ResolvedUnit>,
    graph: &Graph<'_>,
) -> Vec<String> {
    let mut visited: BTreeSet<&str> = BTreeSet::new();
    let mut queue: VecDeque<&str> = units
        .values()
        .filter(|u| u.group == ENTRY_GROUP)
        .map(|u| u.id.as_str())
        .collect();
    visited.extend(queue.iter().copied());

    while let Some(node) = queue.pop_front() {
        for &next in graph.get(node).into_iter().flatten() {
            if visited.insert(next) {
                queue.push_back(next);
            }
        }
    }

    graph
        .keys()
        .filter(|id| !visited.contains(*id))
        .map(|id| (*id).to_owned())
        .collect()
}

/// 자기 루프를 제외한 순환을 강결합 요소마다 하나씩 찾습니다.
///
/// 각 경로는 요소 안의 가장 작은 ID에서 시작해 같은 ID로 끝납니다.
fn find_cycles(graph: &Graph<'_>) -> Vec<Vec<String>> {
    let mut tarjan = Tarjan::new(graph);
    for node in graph.keys() {
        if !tarjan.indices.contains_key(node) {
            tarjan.strong_connect(*node);
        }
    }

    let mut cycles: Vec<Vec<String>> = tarjan
        .components
        .iter()
        .filter(|component| component.len() > 1)
        .filter_map(|component| shortest_cycle(graph, component))
        .collect();
    cycles.sort();
    cycles
}

fn shortest_cycle(graph: &Graph<'_>, component: &BTreeSet<&str>) -> Option<Vec<String>> {
    let start = *component.iter().next()?;
    let mut parent: BTreeMap<&str, &str> = BTreeMap::new();
    let mut queue = VecDeque::from([start]);

    while let Some(node) = queue.pop_front() {
        for &next in graph.get(node).into_iter().flatten() {
            if next == node || !component.contains(next) {
                continue;
            }
            if next == start {
                let mut path = vec![start.to_owned()];
                let mut cursor = node;
                let mut tail = Vec::new();
                while cursor != start {
                    tail.push(cursor.to_owned());
                    cursor = *parent.get(cursor)?;
                }
                tail.reverse();
                path.extend(tail);
                path.push(start.to_owned());
                return Some(path);
            }
            if !parent.contains_key(next) {
                parent.insert(next, node);
                queue.push_back(next);
            }
        }
    }
    None
}

/// 깊은 선형 파이프라인에서도 스택이 넘치지 않도록 명시적 프레임 스택을 씁니다.
struct Tarjan<'g, 'a> {
    graph: &'g Graph<'a>,
    next_index: usize,
    indices: BTreeMap<&'a str, usize>,
    lowlinks: BTreeMap<&'a str, usize>,
    stack: Vec<&'a str>,
    on_stack: BTreeSet<&'a str>,
    components: Vec<BTreeSet<&'a str>>,
}

struct Frame<'a> {
    node: &'a str,
    neighbors: Vec<&'a str>,
    next: usize,
}

impl<'g, 'a> Tarjan<'g, 'a> {
    fn new(graph: &'g Graph<'a>) -> Self {
        Self {
            graph,
            next_index: 0,
            indices: BTreeMap::new(),
            lowlinks: BTreeMap::new(),
            stack: Vec::new(),
            on_stack: BTreeSet::new(),
            components: Vec::new(),
        }
    }

    fn enter(&mut self, node: &'a str) -> Frame<'a> {
        self.indices.insert(node, self.next_index);
        self.lowlinks.insert(node, self.next_index);
        self.next_index += 1;
        self.stack.push(node);
        self.on_stack.insert(node);

        let neighbors = self
            .graph
            .get(node)
            .map(|targets| targets.iter().copied().collect())
            .unwrap_or_default();
        Frame {
            node,
            neighbors,
            next: 0,
        }
    }

    fn lower(&mut self, node: &'a str, candidate: usize) {
        let low = self.lowlinks[node].min(candidate);
        self.lowlinks.insert(node, low);
    }

    fn strong_connect(&mut self, root: &'a str) {
        let mut frames = vec![self.enter(root)];

        while let Some(frame) = frames.last_mut() {
            let node = frame.node;
            if let Some(&next) = frame.neighbors.get(frame.next) {
                frame.next += 1;
                if !self.indices.contains_key(next) {
                    let child = self.enter(next);
                    frames.push(child);
                } else if self.on_stack.contains(next) {
                    self.lower(node, self.indices[next]);
                }
                continue;
            }

            frames.pop();
            if let Some(parent) = frames.last() {
                self.lower(parent.node, self.lowlinks[node]);
            }

            if self.lowlinks[node] == self.indices[node] {
                let mut component = BTreeSet::new();
                while let Some(member) = self.stack.pop() {
                    self.on_stack.remove(member);
                    component.insert(member);
                    if member == node {
                        break;
                    }
                }
                self.components.push(component);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ironbot_core::unit::{Destinations, UnitSpec};

    fn to(target: &str) -> Destinations {
        Destinations::Default(UnitId::from(target))
    }

    fn config(units: Vec<UnitSpec>) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        for unit in units {
            config.upsert_unit(unit);
        }
        config
    }

    #[test]
    fn linear_pipeline_resolves() {
        let cfg = config(vec![
            UnitSpec::new("c", "Collector", "/bin/c").with_destinations(to("p")),
            UnitSpec::new("p", "Parser", "/bin/p").with_destinations(to("o")),
            UnitSpec::new("o", "Output", "/bin/o"),
        ]);
        let plan = resolve(&cfg).unwrap();
        let c = plan.unit("c").unwrap();
        assert_eq!(c.edges.len(), 1);
        assert_eq!(c.edges[0].routing_key, "*");
        assert_eq!(c.edges[0].queue, "p-queue");
        assert!(plan.unit("o").unwrap().is_terminal());
    }

    #[test]
    fn self_loop_is_reported_once() {
        let mut routes = BTreeMap::new();
        routes.insert("a".to_owned(), UnitId::from("c"));
        routes.insert("b".to_owned(), UnitId::from("c"));
        let cfg = config(vec![
            UnitSpec::new("c", "Collector", "/bin/c").with_destinations(Destinations::Routed(routes)),
        ]);
        let errors = resolve(&cfg).unwrap_err();
        assert_eq!(
            errors,
            vec![ResolutionError::SelfLoop {
                unit: "c".to_owned()
            }]
        );
    }

    #[test]
    fn cycle_path_starts_at_smallest_id() {
        let cfg = config(vec![
            UnitSpec::new("a", "Collector", "/bin/a").with_destinations(to("z")),
            UnitSpec::new("z", "Expert", "/bin/z").with_destinations(to("m")),
            UnitSpec::new("m", "Expert", "/bin/m").with_destinations(to("k")),
            UnitSpec::new("k", "Expert", "/bin/k").with_destinations(to("z")),
        ]);
        let errors = resolve(&cfg).unwrap_err();
        assert_eq!(
            errors,
            vec![ResolutionError::Cycle {
                path: vec!["k".into(), "z".into(), "m".into(), "k".into()],
            }]
        );
    }

    #[test]
    fn long_chain_cycle_search_does_not_recurse() {
        let names: Vec<String> = (0..100_000).map(|i| format!("u{i:06}")).collect();
        let mut graph: Graph<'_> = names
            .windows(2)
            .map(|pair| (pair[0].as_str(), BTreeSet::from([pair[1].as_str()])))
            .collect();
        graph.insert(names[names.len() - 1].as_str(), BTreeSet::new());

        assert!(find_cycles(&graph).is_empty());

        // 마지막 유닛이 처음으로 되돌아가면 전체가 하나의 순환
        graph.insert(names[names.len() - 1].as_str(), BTreeSet::from([names[0].as_str()]));
        let cycles = find_cycles(&graph);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].first().map(String::as_str), Some("u000000"));
        assert_eq!(cycles[0].len(), names.len() + 1);
    }

    #[test]
    fn allow_cycles_accepts_loops() {
        let mut cfg = config(vec![
            UnitSpec::new("a", "Collector", "/bin/a").with_destinations(to("b")),
            UnitSpec::new("b", "Expert", "/bin/b").with_destinations(to("a")),
        ]);
        cfg.allow_cycles = true;
        let plan = resolve(&cfg).unwrap();
        assert!(plan.allows_cycles());
    }

    #[test]
    fn unreachable_units_are_listed() {
        let cfg = config(vec![
            UnitSpec::new("c", "Collector", "/bin/c"),
            UnitSpec::new("orphan", "Parser", "/bin/p").with_destinations(to("sink")),
            UnitSpec::new("sink", "Output", "/bin/o"),
        ]);
        let errors = resolve(&cfg).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ResolutionError::Unreachable {
                    unit: "orphan".to_owned()
                },
                ResolutionError::Unreachable {
                    unit: "sink".to_owned()
                },
            ]
        );
    }

    #[test]
    fn invalid_id_empty_module_and_empty_key_are_collected() {
        let mut routes = BTreeMap::new();
        routes.insert(" ".to_owned(), UnitId::from("c"));
        let mut cfg = config(vec![
            UnitSpec::new("c", "Collector", "  ").with_destinations(Destinations::Routed(routes)),
        ]);
        cfg.upsert_unit(UnitSpec::new("bad id", "Collector", "/bin/x"));

        let errors = resolve(&cfg).unwrap_err();
        assert!(errors.contains(&ResolutionError::InvalidUnitId {
            unit: "bad id".to_owned()
        }));
        assert!(errors.contains(&ResolutionError::EmptyModule {
            unit: "c".to_owned()
        }));
        assert!(errors.contains(&ResolutionError::EmptyRoutingKey {
            unit: "c".to_owned()
        }));
    }

    #[test]
    fn strict_group_failure_becomes_config_error() {
        let mut cfg = config(vec![
            UnitSpec::new("c", "Collector", "/bin/c").with_destinations(to("t")),
            UnitSpec::new("t", "Tagger", "/bin/t"),
        ]);
        cfg.defaults.strict_groups = true;
        let errors = resolve(&cfg).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], ResolutionError::Config { unit, .. } if unit == "t"));
    }

    #[test]
    fn empty_config_resolves_to_empty_plan() {
        let plan = resolve(&PipelineConfig::default()).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.fingerprint(), PipelinePlan::empty().fingerprint());
    }
}
