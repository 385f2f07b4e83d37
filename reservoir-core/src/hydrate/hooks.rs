//! Hydration hooks: callbacks run on entry to and exit from every node.

use std::cell::RefCell;
use std::rc::Rc;
use std::str::FromStr;

use crate::dom::NodeId;
use crate::reactive::Runtime;

/// When a hook runs relative to a node's directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    /// Before any directive on the node. Runs even for hidden nodes.
    Pre,
    /// After the node and its subtree. Always runs once `Pre` has.
    Post,
}

impl FromStr for HookPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preHydrate" => Ok(Self::Pre),
            "postHydrate" => Ok(Self::Post),
            other => Err(format!("unknown hook phase `{other}`")),
        }
    }
}

pub type Hook = Rc<dyn Fn(&Runtime, NodeId)>;

/// Append-only pre and post hook lists.
#[derive(Default)]
pub struct HookRegistry {
    pre: RefCell<Vec<Hook>>,
    post: RefCell<Vec<Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn list(&self, phase: HookPhase) -> &RefCell<Vec<Hook>> {
        match phase {
            HookPhase::Pre => &self.pre,
            HookPhase::Post => &self.post,
        }
    }

    pub fn add(&self, phase: HookPhase, hook: impl Fn(&Runtime, NodeId) + 'static) {
        self.list(phase).borrow_mut().push(Rc::new(hook));
    }

    pub fn len(&self, phase: HookPhase) -> usize {
        self.list(phase).borrow().len()
    }

    /// Invoke every hook of `phase` in registration order.
    ///
    /// The list is cloned first so a hook may register further hooks; those
    /// take effect from the next node on.
    pub(crate) fn run(&self, phase: HookPhase, runtime: &Runtime, node: NodeId) {
        let hooks = self.list(phase).borrow().clone();
        for hook in hooks {
            hook(runtime, node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_phase_names() {
        assert_eq!("preHydrate".parse::<HookPhase>(), Ok(HookPhase::Pre));
        assert_eq!("postHydrate".parse::<HookPhase>(), Ok(HookPhase::Post));
        assert!("onHydrate".parse::<HookPhase>().is_err());
    }

    #[test]
    fn test_hooks_run_in_registration_order() {
        let rt = Runtime::from_html("");
        let order = Rc::new(RefCell::new(Vec::new()));
        for label in ["a", "b"] {
            let order = order.clone();
            rt.add_hook(HookPhase::Pre, move |_, _| order.borrow_mut().push(label));
        }
        let root = rt.document().root();
        rt.hooks.run(HookPhase::Pre, &rt, root);
        rt.hooks.run(HookPhase::Post, &rt, root);
        assert_eq!(*order.borrow(), ["a", "b"]);
    }

    #[test]
    fn test_hook_may_register_hooks() {
        let rt = Runtime::from_html("");
        let calls = Rc::new(Cell::new(0));
        let inner = calls.clone();
        rt.add_hook(HookPhase::Post, move |rt, _| {
            inner.set(inner.get() + 1);
            let nested = inner.clone();
            rt.add_hook(HookPhase::Post, move |_, _| nested.set(nested.get() + 100));
        });
        let root = rt.document().root();
        rt.hooks.run(HookPhase::Post, &rt, root);
        assert_eq!(calls.get(), 1);
        assert_eq!(rt.hooks.len(HookPhase::Post), 2);
    }
}
