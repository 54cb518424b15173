//! Turns a controller's static route table into mountable routes.

use crate::collector::Exclusions;
use crate::contracts::ControllerRef;
use crate::error::BuildError;
use crate::model::{HandlerDescriptor, HttpMethod, MethodSpec, PathPattern, Role};
use crate::registry::RouteRecord;
use crate::transport::PathMatcher;

const STRIPPED_SUFFIXES: [&str; 2] = ["Controller", "Handler"];

/// Collapses repeated separators, adds a leading `/` and drops a trailing one.
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// `UsersController` → `users`, `AuditHandler` → `audit`.
pub fn default_prefix(type_name: &str) -> String {
    let stem = STRIPPED_SUFFIXES
        .iter()
        .find_map(|suffix| type_name.strip_suffix(suffix))
        .filter(|s| !s.is_empty())
        .unwrap_or(type_name);
    stem.to_lowercase()
}

/// Prefix every literal route of `controller` is mounted under.
pub fn mount_prefix(controller: &ControllerRef) -> String {
    match controller.sub_router() {
        None => String::new(),
        Some(sub) if sub.prefix.is_empty() => default_prefix(controller.type_name()),
        Some(sub) => sub.prefix,
    }
}

/// One registration ready for the transport.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    /// Qualified name of the owning controller.
    pub controller: &'static str,
    pub descriptor: HandlerDescriptor,
    /// Mount path, raw regex, or event-bus address.
    pub path: String,
    /// `None` for event-bus consumers.
    pub matcher: Option<PathMatcher>,
}

impl ResolvedRoute {
    pub fn is_consumer(&self) -> bool {
        self.descriptor.http_methods.contains(&HttpMethod::EventBus)
    }

    pub fn record(&self) -> RouteRecord {
        RouteRecord {
            controller: self.descriptor.owner,
            method: self.descriptor.method.name,
            http_methods: self.descriptor.http_methods.clone(),
            path: self.path.clone(),
            role: self.descriptor.role,
        }
    }
}

/// Handler descriptors of `controller`, in declaration order.
///
/// A method yields one descriptor per distinct path it declares; role markers
/// on the same method are folded into that descriptor.
pub fn describe(
    controller: &ControllerRef,
    default_role: Role,
) -> Result<Vec<HandlerDescriptor>, BuildError> {
    let owner = controller.type_name();
    let default_role = match default_role {
        Role::Socket => Role::Normal,
        other => other,
    };
    let mut out = Vec::new();
    for (order, spec) in controller
        .describe_routes()
        .into_iter()
        .filter(|s| s.annotations.is_route())
        .enumerate()
    {
        describe_method(owner, order, spec, default_role, &mut out)?;
    }
    Ok(out)
}

fn describe_method(
    owner: &'static str,
    order: usize,
    spec: MethodSpec,
    default_role: Role,
    out: &mut Vec<HandlerDescriptor>,
) -> Result<(), BuildError> {
    let MethodSpec {
        method,
        annotations: a,
    } = spec;
    let name = method.name;
    let descriptor = |http_methods: Vec<HttpMethod>, path: PathPattern, role: Role| {
        HandlerDescriptor {
            owner,
            method: method.clone(),
            http_methods,
            path,
            role,
            blocking: a.blocking,
            auth: a.auth.clone(),
            order,
        }
    };
    let or_name = |value: &str| {
        if value.is_empty() {
            name.to_string()
        } else {
            value.to_string()
        }
    };

    if let Some(path) = &a.socket {
        out.push(descriptor(
            vec![HttpMethod::Socket],
            PathPattern::Literal(or_name(path)),
            Role::Socket,
        ));
        return Ok(());
    }

    if let Some(address) = &a.consumer {
        if address.is_empty() {
            return Err(BuildError::MissingAnnotationValue {
                controller: owner,
                method: name,
                annotation: "consumer",
            });
        }
        let role = if a.blocking { Role::Blocking } else { Role::Normal };
        let mut d = descriptor(
            vec![HttpMethod::EventBus],
            PathPattern::Literal(address.clone()),
            role,
        );
        d.auth = None;
        out.push(d);
    }

    let role = if a.failure {
        Role::Failure
    } else if a.blocking {
        Role::Blocking
    } else if a.handler {
        Role::Normal
    } else {
        default_role
    };

    if a.verbs.is_empty() {
        if a.failure {
            out.push(descriptor(
                vec![HttpMethod::Any],
                PathPattern::Literal("*".to_string()),
                role,
            ));
        } else if a.handler || (a.blocking && a.consumer.is_none()) {
            out.push(descriptor(
                vec![HttpMethod::Any],
                PathPattern::Literal(name.to_string()),
                role,
            ));
        }
        return Ok(());
    }

    // Verbs sharing a path become one multi-method route.
    let mut groups: Vec<(PathPattern, Vec<HttpMethod>)> = Vec::new();
    for verb in &a.verbs {
        let path = if verb.regex {
            if verb.value.is_empty() {
                return Err(BuildError::MissingAnnotationValue {
                    controller: owner,
                    method: name,
                    annotation: "regex",
                });
            }
            PathPattern::Regex(verb.value.clone())
        } else {
            PathPattern::Literal(or_name(&verb.value))
        };
        match groups.iter_mut().find(|(p, _)| *p == path) {
            Some((_, methods)) if !methods.contains(&verb.method) => methods.push(verb.method),
            Some(_) => {}
            None => groups.push((path, vec![verb.method])),
        }
    }
    for (path, methods) in groups {
        out.push(descriptor(methods, path, role));
    }
    Ok(())
}

/// Routes of `controller` with final paths and compiled matchers.
/// Excluded controllers resolve to nothing.
pub fn resolve(
    controller: &ControllerRef,
    excluded: &Exclusions,
    default_role: Role,
) -> Result<Vec<ResolvedRoute>, BuildError> {
    if excluded.contains(controller) {
        return Ok(Vec::new());
    }
    let prefix = mount_prefix(controller);
    describe(controller, default_role)?
        .into_iter()
        .map(|descriptor| -> Result<ResolvedRoute, BuildError> {
            let consumer = descriptor.http_methods.contains(&HttpMethod::EventBus);
            let (path, matcher) = match &descriptor.path {
                PathPattern::Literal(address) if consumer => (address.clone(), None),
                PathPattern::Literal(p) => {
                    let full = normalize(&format!("{prefix}/{p}"));
                    let matcher = PathMatcher::literal(&full);
                    (full, Some(matcher))
                }
                PathPattern::Regex(p) => {
                    let matcher =
                        PathMatcher::regex(p).map_err(|source| BuildError::InvalidPattern {
                            controller: descriptor.owner,
                            method: descriptor.method.name,
                            pattern: p.clone(),
                            source,
                        })?;
                    (p.clone(), Some(matcher))
                }
            };
            Ok(ResolvedRoute {
                controller: controller.qualified_name(),
                descriptor,
                path,
                matcher,
            })
        })
        .collect()
}
