//! Ordered middleware chain with explicit continuation passing.

mod action;
mod action_state;
mod context;

use std::sync::Arc;

use anyhow::Result;

use crate::error::FlowError;
use crate::model::FlowStateUpdate;

pub use action::ActionType;
pub use action_state::{ActionStateManager, LinkingState, ResizeState, RotationState};
pub use context::PipelineContext;

/// One link in the chain. `execute` must either call `next.run(...)` to
/// continue (with or without a delta) or drop `next` to veto the rest of
/// the chain. Work after `next.run` returns sees the final downstream
/// state.
pub trait Middleware {
    fn name(&self) -> &str;

    fn execute(&self, ctx: &mut PipelineContext<'_>, next: Next<'_>) -> Result<()>;
}

/// Continuation handle for the remaining chain. Consumed on use, so a
/// middleware can pass control downstream at most once.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
}

impl Next<'_> {
    /// Merge `delta` (if any) into the live view and run the rest of the
    /// chain.
    pub fn run(self, ctx: &mut PipelineContext<'_>, delta: Option<FlowStateUpdate>) -> Result<()> {
        if let Some(delta) = delta {
            ctx.merge_delta(delta);
        }
        let Some((head, rest)) = self.chain.split_first() else {
            return Ok(());
        };
        head.execute(ctx, Next { chain: rest }).map_err(|source| {
            if source.is::<FlowError>() {
                source
            } else {
                anyhow::Error::from(FlowError::Middleware {
                    name: head.name().to_string(),
                    source,
                })
            }
        })
    }
}

/// Registration-ordered middleware chain. Built-ins sit at the front and
/// always run before custom registrations.
pub struct Pipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
    builtin_count: usize,
}

impl Pipeline {
    pub fn new(builtins: Vec<Arc<dyn Middleware>>) -> Self {
        let builtin_count = builtins.len();
        Self {
            middlewares: builtins,
            builtin_count,
        }
    }

    /// Append a custom middleware, or replace an earlier custom
    /// registration with the same name. Built-ins cannot be shadowed.
    pub fn register(&mut self, middleware: Arc<dyn Middleware>) {
        let name = middleware.name().to_string();
        match self
            .middlewares
            .iter()
            .position(|existing| existing.name() == name)
        {
            Some(position) if position < self.builtin_count => {
                tracing::warn!(middleware = %name, "cannot replace a built-in middleware");
            }
            Some(position) => {
                self.middlewares[position] = middleware;
            }
            None => self.middlewares.push(middleware),
        }
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        match self
            .middlewares
            .iter()
            .position(|existing| existing.name() == name)
        {
            Some(position) if position >= self.builtin_count => {
                self.middlewares.remove(position);
                true
            }
            Some(_) => {
                tracing::warn!(middleware = name, "cannot unregister a built-in middleware");
                false
            }
            None => false,
        }
    }

    pub fn middleware_names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    /// Run the whole chain. Any middleware error aborts the action; the
    /// caller keeps the previous committed state.
    pub fn run(&self, ctx: &mut PipelineContext<'_>) -> Result<(), FlowError> {
        Next {
            chain: &self.middlewares,
        }
        .run(ctx, None)
        .map_err(|err| match err.downcast::<FlowError>() {
            Ok(flow) => flow,
            Err(other) => FlowError::Middleware {
                name: "pipeline".to_string(),
                source: other,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowConfig;
    use crate::middleware::events::InitTracker;
    use crate::model::{FlowState, Node, NodeUpdate};
    use crate::routing::RoutingManager;
    use crate::geometry::Point;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recorder {
        name: String,
        log: Rc<RefCell<Vec<String>>>,
        veto: bool,
        fail: bool,
        delta: Option<FlowStateUpdate>,
    }

    impl Recorder {
        fn new(name: &str, log: &Rc<RefCell<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                log: log.clone(),
                veto: false,
                fail: false,
                delta: None,
            }
        }
    }

    impl Middleware for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn execute(&self, ctx: &mut PipelineContext<'_>, next: Next<'_>) -> Result<()> {
            self.log.borrow_mut().push(self.name.clone());
            if self.fail {
                anyhow::bail!("boom");
            }
            if self.veto {
                return Ok(());
            }
            next.run(ctx, self.delta.clone())
        }
    }

    fn run_chain(middlewares: Vec<Arc<dyn Middleware>>) -> Result<FlowState, FlowError> {
        let state = FlowState {
            nodes: vec![Node::new("a", Point::new(0.0, 0.0))],
            ..FlowState::default()
        };
        let config = FlowConfig::default();
        let routing = RoutingManager::new(None);
        let mut action_state = ActionStateManager::default();
        let mut tracker = InitTracker::default();
        let pipeline = Pipeline::new(middlewares);
        let mut ctx = PipelineContext::new(
            &state,
            ActionType::UpdateNode,
            FlowStateUpdate::default(),
            &config,
            &routing,
            &mut action_state,
            &mut tracker,
        );
        pipeline.run(&mut ctx)?;
        Ok(ctx.into_commit().0)
    }

    #[test]
    fn middlewares_run_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let result = run_chain(vec![
            Arc::new(Recorder::new("first", &log)),
            Arc::new(Recorder::new("second", &log)),
            Arc::new(Recorder::new("third", &log)),
        ]);
        assert!(result.is_ok());
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn dropping_next_vetoes_downstream() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut veto = Recorder::new("veto", &log);
        veto.veto = true;
        let result = run_chain(vec![
            Arc::new(Recorder::new("first", &log)),
            Arc::new(veto),
            Arc::new(Recorder::new("unreached", &log)),
        ]);
        assert!(result.is_ok());
        assert_eq!(*log.borrow(), vec!["first", "veto"]);
    }

    #[test]
    fn a_failing_middleware_aborts_the_action() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut failing = Recorder::new("failing", &log);
        failing.fail = true;
        let result = run_chain(vec![Arc::new(failing)]);
        match result {
            Err(FlowError::Middleware { name, .. }) => assert_eq!(name, "failing"),
            other => panic!("expected middleware failure, got {other:?}"),
        }
    }

    #[test]
    fn deltas_are_visible_downstream() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut mover = Recorder::new("mover", &log);
        let mut update = NodeUpdate::new("a");
        update.position = Some(Point::new(42.0, 0.0));
        mover.delta = Some(FlowStateUpdate::update_nodes(vec![update]));

        struct AssertSeen {
            log: Rc<RefCell<Vec<String>>>,
        }
        impl Middleware for AssertSeen {
            fn name(&self) -> &str {
                "assert-seen"
            }
            fn execute(&self, ctx: &mut PipelineContext<'_>, next: Next<'_>) -> Result<()> {
                self.log.borrow_mut().push(self.name().to_string());
                assert_eq!(ctx.nodes_map["a"].position, Point::new(42.0, 0.0));
                assert!(ctx.node_fields_changed("a", &[crate::model::NodeField::Position]));
                next.run(ctx, None)
            }
        }

        let state = run_chain(vec![
            Arc::new(mover),
            Arc::new(AssertSeen { log: log.clone() }),
        ])
        .unwrap();
        assert_eq!(state.nodes[0].position, Point::new(42.0, 0.0));
        assert_eq!(*log.borrow(), vec!["mover", "assert-seen"]);
    }

    #[test]
    fn builtins_cannot_be_unregistered() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pipeline = Pipeline::new(vec![Arc::new(Recorder::new("builtin", &log))]);
        pipeline.register(Arc::new(Recorder::new("custom", &log)));
        assert!(!pipeline.unregister("builtin"));
        assert!(pipeline.unregister("custom"));
        assert_eq!(pipeline.middleware_names(), vec!["builtin"]);
    }
}
