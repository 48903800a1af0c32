use crate::form::Form;
use crate::form_compiler::{form_coefficient, CoefficientStrategy, KernelCoefficient};
use crate::space::{Coefficient, CoefficientId};
use log::trace;
use rustc_hash::FxHashSet;

/// Lays out kernel coefficients, keeping designated mixed coefficients in one piece.
///
/// Patch solvers hand the current iterate to the kernel as a single buffer holding all
/// subspaces back to back, so a state on a mixed space must not be split. Every other mixed
/// coefficient is split into one argument per subspace. Either way, each argument records the
/// number of the original coefficient in the form.
#[derive(Debug, Clone, Default)]
pub struct PatchKernelBuilder {
    unsplit: FxHashSet<CoefficientId>,
}

impl PatchKernelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder that keeps all the given coefficients whole.
    pub fn dont_split<'a>(coefficients: impl IntoIterator<Item = &'a Coefficient>) -> Self {
        Self {
            unsplit: coefficients.into_iter().map(Coefficient::id).collect(),
        }
    }

    pub fn keep_whole(&mut self, coefficient: &Coefficient) {
        self.unsplit.insert(coefficient.id());
    }

    pub fn is_kept_whole(&self, coefficient: &Coefficient) -> bool {
        self.unsplit.contains(&coefficient.id())
    }
}

impl CoefficientStrategy for PatchKernelBuilder {
    fn set_coefficients(&self, form: &Form, enabled: &[usize]) -> eyre::Result<Vec<KernelCoefficient>> {
        let mut arguments = Vec::new();
        for &number in enabled {
            let coefficient = form_coefficient(form, number)?;
            let space = coefficient.space();
            if space.is_mixed() && !self.is_kept_whole(coefficient) {
                for (sub, subspace) in space.subspaces().into_iter().enumerate() {
                    arguments.push(KernelCoefficient {
                        name: format!("w_{}", arguments.len()),
                        coefficient: coefficient.clone(),
                        number,
                        sub: Some(sub),
                        space: subspace,
                    });
                }
            } else {
                if space.is_mixed() {
                    trace!("Keeping coefficient {} on {} whole", coefficient.name(), space);
                }
                arguments.push(KernelCoefficient {
                    name: format!("w_{}", arguments.len()),
                    coefficient: coefficient.clone(),
                    number,
                    sub: None,
                    space: space.clone(),
                });
            }
        }
        Ok(arguments)
    }
}
