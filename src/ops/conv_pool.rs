use crate::infer::{
    InferType, TypeError, check_rank, expand_padding, expand_pair, output_dtype, parse_layout,
    tensor_args,
};
use crate::struct_info::{DataType, StructInfo, TensorType};
use crate::sym_expr::SymExpr;

/// Axes which data and output layouts must contain.
const DATA_AXES: &[char] = &['N', 'C', 'H', 'W'];

/// Axes which kernel layouts must contain.
const KERNEL_AXES: &[char] = &['O', 'I', 'H', 'W'];

/// Return the output size for a spatial dimension in a convolution or pooling
/// operation.
///
/// This is `floordiv(in + pad_start + pad_end - dilation * (kernel - 1) - 1,
/// stride) + 1`. With `ceil_mode` the division rounds up instead.
fn output_size(
    in_size: SymExpr,
    kernel_size: SymExpr,
    stride: SymExpr,
    dilation: SymExpr,
    pad_start: SymExpr,
    pad_end: SymExpr,
    ceil_mode: bool,
) -> SymExpr {
    let one = SymExpr::from(1);
    let padded_in_size = in_size + pad_start + pad_end;
    let mut numerator = padded_in_size - dilation * (kernel_size - one.clone()) - one.clone();
    if ceil_mode {
        numerator = numerator + (stride.clone() - one.clone());
    }
    numerator.floor_div(&stride) + one
}

fn canonical_dims(dims: &[SymExpr]) -> Vec<SymExpr> {
    dims.iter().map(SymExpr::simplify).collect()
}

/// Window parameters for both spatial axes, after broadcasting.
struct Window {
    strides: [SymExpr; 2],
    dilation: [SymExpr; 2],

    /// Padding as `[top, left, bottom, right]`.
    padding: [SymExpr; 4],
}

impl Window {
    fn new(
        strides: &[SymExpr],
        dilation: &[SymExpr],
        padding: &[SymExpr],
    ) -> Result<Window, TypeError> {
        Ok(Window {
            strides: expand_pair("strides", strides)?,
            dilation: expand_pair("dilation", dilation)?,
            padding: expand_padding(padding)?,
        })
    }

    /// Return the output size along spatial axis `dim` (0 for height, 1 for
    /// width).
    fn output_size(
        &self,
        dim: usize,
        in_size: SymExpr,
        kernel_size: SymExpr,
        ceil_mode: bool,
    ) -> SymExpr {
        output_size(
            in_size,
            kernel_size,
            self.strides[dim].clone(),
            self.dilation[dim].clone(),
            self.padding[dim].clone(),
            self.padding[dim + 2].clone(),
            ceil_mode,
        )
    }
}

/// 2D convolution.
///
/// Takes a data tensor and a weight tensor. The physical order of their axes
/// is given by `data_layout` and `kernel_layout`, and the output is produced
/// in `out_layout`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Conv2d {
    /// Stride along each spatial axis. One value applies to both axes.
    pub strides: Vec<SymExpr>,

    /// Padding as one value for all sides, a `[height, width]` pair or
    /// `[top, left, bottom, right]`.
    pub padding: Vec<SymExpr>,

    /// Dilation along each spatial axis. One value applies to both axes.
    pub dilation: Vec<SymExpr>,

    pub data_layout: String,
    pub kernel_layout: String,

    /// Output layout. Defaults to `data_layout`.
    pub out_layout: Option<String>,

    /// Output element type. Defaults to the input element type.
    pub out_dtype: Option<DataType>,
}

impl Default for Conv2d {
    fn default() -> Self {
        Conv2d {
            strides: vec![1.into()],
            padding: vec![0.into()],
            dilation: vec![1.into()],
            data_layout: "NCHW".to_string(),
            kernel_layout: "OIHW".to_string(),
            out_layout: None,
            out_dtype: None,
        }
    }
}

impl Conv2d {
    fn out_layout(&self) -> &str {
        self.out_layout.as_deref().unwrap_or(&self.data_layout)
    }

    /// Check the number of elements in window attributes.
    pub fn validate(&self) -> Result<(), TypeError> {
        Window::new(&self.strides, &self.dilation, &self.padding).map(|_| ())
    }

    /// Return a copy with symbolic window attributes in canonical form.
    pub fn canonical(&self) -> Conv2d {
        Conv2d {
            strides: canonical_dims(&self.strides),
            padding: canonical_dims(&self.padding),
            dilation: canonical_dims(&self.dilation),
            ..self.clone()
        }
    }
}

impl InferType for Conv2d {
    fn infer_type(&self, args: &[StructInfo]) -> Result<TensorType, TypeError> {
        let [data, weight] = tensor_args(args)?;

        let data_layout = parse_layout("data_layout", &self.data_layout, DATA_AXES)?;
        let kernel_layout = parse_layout("kernel_layout", &self.kernel_layout, KERNEL_AXES)?;
        let out_layout = parse_layout("out_layout", self.out_layout(), DATA_AXES)?;

        check_rank("data", data, &data_layout)?;
        check_rank("weight", weight, &kernel_layout)?;

        let window = Window::new(&self.strides, &self.dilation, &self.padding)?;
        let dtype = output_dtype(self.out_dtype, data.dtype(), weight.dtype())?;

        let (Some(data_dims), Some(weight_dims)) = (data.dims(), weight.dims()) else {
            return Ok(TensorType::with_ndim(out_layout.rank(), dtype));
        };

        let in_channels = data_layout.logical_extent(data_dims, 'C');
        let kernel_in_channels = kernel_layout.logical_extent(weight_dims, 'I');
        if in_channels.provably_unequal(&kernel_in_channels) {
            return Err(TypeError::ChannelMismatch {
                data: in_channels,
                weight: kernel_in_channels,
            });
        }

        let out_h = window.output_size(
            0,
            data_layout.logical_extent(data_dims, 'H'),
            kernel_layout.logical_extent(weight_dims, 'H'),
            false,
        );
        let out_w = window.output_size(
            1,
            data_layout.logical_extent(data_dims, 'W'),
            kernel_layout.logical_extent(weight_dims, 'W'),
            false,
        );
        let batch = data_layout.logical_extent(data_dims, 'N');
        let out_channels = kernel_layout.logical_extent(weight_dims, 'O');

        let shape = out_layout.compose(|axis| match axis {
            'N' => batch.clone(),
            'C' => out_channels.clone(),
            'H' => out_h.clone(),
            'W' => out_w.clone(),
            _ => SymExpr::Unknown,
        });
        Ok(TensorType::new(shape, dtype))
    }
}

/// 2D max or average pooling.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Pool2d {
    /// Window size along each spatial axis. One value applies to both axes.
    pub pool_size: Vec<SymExpr>,
    pub strides: Vec<SymExpr>,
    pub padding: Vec<SymExpr>,
    pub dilation: Vec<SymExpr>,

    /// Round output sizes up rather than down.
    pub ceil_mode: bool,

    pub layout: String,
    pub out_layout: Option<String>,
}

impl Default for Pool2d {
    fn default() -> Self {
        Pool2d {
            pool_size: vec![1.into()],
            strides: vec![1.into()],
            padding: vec![0.into()],
            dilation: vec![1.into()],
            ceil_mode: false,
            layout: "NCHW".to_string(),
            out_layout: None,
        }
    }
}

impl Pool2d {
    fn out_layout(&self) -> &str {
        self.out_layout.as_deref().unwrap_or(&self.layout)
    }

    /// Check the number of elements in window attributes.
    pub fn validate(&self) -> Result<(), TypeError> {
        expand_pair("pool_size", &self.pool_size)?;
        Window::new(&self.strides, &self.dilation, &self.padding).map(|_| ())
    }

    /// Return a copy with symbolic window attributes in canonical form.
    pub fn canonical(&self) -> Pool2d {
        Pool2d {
            pool_size: canonical_dims(&self.pool_size),
            strides: canonical_dims(&self.strides),
            padding: canonical_dims(&self.padding),
            dilation: canonical_dims(&self.dilation),
            ..self.clone()
        }
    }
}

impl InferType for Pool2d {
    fn infer_type(&self, args: &[StructInfo]) -> Result<TensorType, TypeError> {
        let [data] = tensor_args(args)?;

        let layout = parse_layout("layout", &self.layout, DATA_AXES)?;
        let out_layout = parse_layout("out_layout", self.out_layout(), DATA_AXES)?;
        check_rank("data", data, &layout)?;

        let [pool_h, pool_w] = expand_pair("pool_size", &self.pool_size)?;
        let window = Window::new(&self.strides, &self.dilation, &self.padding)?;

        let Some(dims) = data.dims() else {
            return Ok(TensorType::with_ndim(out_layout.rank(), data.dtype()));
        };

        let out_h = window.output_size(0, layout.logical_extent(dims, 'H'), pool_h, self.ceil_mode);
        let out_w = window.output_size(1, layout.logical_extent(dims, 'W'), pool_w, self.ceil_mode);
        let batch = layout.logical_extent(dims, 'N');
        let channels = layout.logical_extent(dims, 'C');

        let shape = out_layout.compose(|axis| match axis {
            'N' => batch.clone(),
            'C' => channels.clone(),
            'H' => out_h.clone(),
            'W' => out_w.clone(),
            _ => SymExpr::Unknown,
        });
        Ok(TensorType::new(shape, data.dtype()))
    }
}
