use std::collections::HashMap;
use std::fmt;

use crate::edsl::{EdslContext, Tensor};
use crate::error::{Error, Result};
use crate::model::{ConstantTensor, Layer};

/// Everything a lowering sees of one layer instance.
pub struct LoweringContext<'a> {
    pub layer: &'a Layer,
    /// One tensor per layer input, in order.
    pub operands: Vec<Tensor>,
    /// The constant behind each operand, where the operand is a network constant.
    pub constants: Vec<Option<&'a ConstantTensor>>,
    pub edsl: &'a EdslContext,
}

impl<'a> LoweringContext<'a> {
    /// Fail unless the layer has exactly `count` operands.
    pub fn expect_operands(&self, count: usize) -> Result<()> {
        if self.operands.len() != count {
            return Err(Error::ValidationError(format!(
                "{} requires {} inputs, got {}",
                self.layer.op_type,
                count,
                self.operands.len()
            )));
        }
        Ok(())
    }

    pub fn operand(&self, index: usize) -> Result<&Tensor> {
        self.operands.get(index).ok_or_else(|| {
            Error::ValidationError(format!(
                "{} has no operand {}",
                self.layer.op_type, index
            ))
        })
    }

    /// Constant data behind operand `index`.
    pub fn constant_operand(&self, index: usize) -> Result<&'a ConstantTensor> {
        self.constants.get(index).copied().flatten().ok_or_else(|| {
            Error::ValidationError(format!(
                "{} operand {} must be a constant",
                self.layer.op_type, index
            ))
        })
    }
}

/// Lowers one layer into tensor-program values, one per layer output.
pub type LoweringFn = fn(&LoweringContext<'_>) -> Result<Vec<Tensor>>;

/// Registry of lowerings keyed by operator type, matched case-insensitively.
#[derive(Default)]
pub struct LoweringRegistry {
    lowerings: HashMap<String, LoweringFn>,
}

impl fmt::Debug for LoweringRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoweringRegistry")
            .field("op_types", &self.op_types())
            .finish()
    }
}

impl LoweringRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            lowerings: HashMap::new(),
        }
    }

    /// Register a lowering
    pub fn register_lowering(&mut self, op_type: &str, lowering: LoweringFn) -> Result<()> {
        let key = op_type.to_ascii_lowercase();
        if self.lowerings.contains_key(&key) {
            return Err(Error::InvalidOperator(format!(
                "Operator {} is already registered",
                op_type
            )));
        }
        self.lowerings.insert(key, lowering);
        Ok(())
    }

    pub fn get_lowering(&self, op_type: &str) -> Option<LoweringFn> {
        self.lowerings.get(&op_type.to_ascii_lowercase()).copied()
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.lowerings.contains_key(&op_type.to_ascii_lowercase())
    }

    /// Registered operator types, sorted.
    pub fn op_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lowerings.keys().cloned().collect();
        names.sort();
        names
    }

    /// Initialize the registry with the plugin's lowerings
    pub fn with_standard_lowerings() -> Self {
        use crate::ops::convolution::lower_convolution;
        use crate::ops::deformable_convolution::lower_deformable_convolution;
        use crate::ops::range::lower_range;

        let standard: [(&str, LoweringFn); 3] = [
            ("Convolution", lower_convolution),
            ("DeformableConvolution", lower_deformable_convolution),
            ("Range", lower_range),
        ];
        let mut registry = Self::new();
        for (op_type, lowering) in standard {
            registry
                .lowerings
                .insert(op_type.to_ascii_lowercase(), lowering);
        }
        registry
    }

    /// Run the lowering registered for `ctx.layer.op_type`.
    pub fn lower(&self, ctx: &LoweringContext<'_>) -> Result<Vec<Tensor>> {
        let lowering = self.get_lowering(&ctx.layer.op_type).ok_or_else(|| {
            Error::InvalidOperator(format!("Unsupported operator {}", ctx.layer.op_type))
        })?;
        lowering(ctx)
    }
}
