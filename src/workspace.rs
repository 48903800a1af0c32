use std::any::Any;
use std::cell::RefCell;
use thread_local::ThreadLocal;

/// A workspace that contains type-erased objects.
///
/// The workspace is intended to hold intermediate data used as workspace in computations.
/// It is optimized particularly for the case where the same type is accessed many times in a row.
#[derive(Debug, Default)]
pub struct Workspace {
    workspaces: Vec<Box<dyn Any + Send>>,
}

impl Workspace {
    pub fn get_or_insert_with<W, F>(&mut self, create: F) -> &mut W
    where
        W: 'static + Send,
        F: FnOnce() -> W,
    {
        // The Vec is treated as a stack, so we search from the end
        let idx = match self.workspaces.iter().rposition(|ws| ws.is::<W>()) {
            Some(idx) => idx,
            None => {
                self.workspaces.push(Box::new(create()));
                self.workspaces.len() - 1
            }
        };

        // The same object is likely to be accessed many times in sequence, so keep it last
        let last = self.workspaces.len() - 1;
        self.workspaces.swap(idx, last);

        self.workspaces[last]
            .downcast_mut()
            .expect("Internal error: Downcasting can by definition not fail")
    }

    pub fn get_or_default<W>(&mut self) -> &mut W
    where
        W: 'static + Send + Default,
    {
        self.get_or_insert_with(Default::default)
    }
}

/// Per-thread workspaces, to be owned by a long-lived object that is shared between threads.
pub type ThreadLocalWorkspace = ThreadLocal<RefCell<Workspace>>;

/// Runs `f` with the calling thread's instance of `W` in the given workspace.
///
/// # Panics
///
/// Panics if called recursively for the same workspace on the same thread.
pub fn with_thread_local_workspace<W, T>(workspace: &ThreadLocalWorkspace, f: impl FnOnce(&mut W) -> T) -> T
where
    W: 'static + Send + Default,
{
    let cell = workspace.get_or(|| RefCell::new(Workspace::default()));
    let mut ws = cell.borrow_mut();
    f(ws.get_or_default())
}
