use crate::enums::DragAxis;
use crate::equation::{CompiledEquation, EquationError};
use crate::parameter::ScannerParameter;

/// Mouse-drag bindings declared for an image type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DragBindings {
    pub horizontal: Option<String>,
    pub vertical: Option<String>,
}

impl DragBindings {
    pub fn get(&self, axis: DragAxis) -> Option<&str> {
        match axis {
            DragAxis::Horizontal => self.horizontal.as_deref(),
            DragAxis::Vertical => self.vertical.as_deref(),
        }
    }

    /// Bind `parameter` to `axis`, unbinding it from the other axis
    pub fn bind(&mut self, parameter: impl Into<String>, axis: DragAxis) {
        let parameter = parameter.into();
        let (target, other) = match axis {
            DragAxis::Horizontal => (&mut self.horizontal, &mut self.vertical),
            DragAxis::Vertical => (&mut self.vertical, &mut self.horizontal),
        };
        if other.as_deref() == Some(parameter.as_str()) {
            *other = None;
        }
        *target = Some(parameter);
    }

    pub fn unbind(&mut self, axis: DragAxis) {
        match axis {
            DragAxis::Horizontal => self.horizontal = None,
            DragAxis::Vertical => self.vertical = None,
        }
    }
}

/// Immutable, compiled description of one synthetic contrast
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticImageType {
    name: String,
    preset: String,
    title: String,
    equation: CompiledEquation,
    parameters: Vec<ScannerParameter>,
    window_width: Option<f64>,
    window_center: Option<f64>,
    drag: DragBindings,
}

impl SyntheticImageType {
    /// Compile `equation` against the parameter names and `map_names`.
    ///
    /// # Errors
    ///
    /// Returns the compiler's [`EquationError`], naming `name`.
    pub fn compile(
        name: impl Into<String>,
        preset: impl Into<String>,
        title: impl Into<String>,
        equation: &str,
        parameters: Vec<ScannerParameter>,
        map_names: &[&str],
    ) -> Result<Self, EquationError> {
        let name = name.into();
        let parameter_names: Vec<&str> = parameters.iter().map(ScannerParameter::name).collect();
        let equation = CompiledEquation::compile(&name, equation, &parameter_names, map_names)?;
        Ok(Self {
            name,
            preset: preset.into(),
            title: title.into(),
            equation,
            parameters,
            window_width: None,
            window_center: None,
            drag: DragBindings::default(),
        })
    }

    pub fn with_window(mut self, width: Option<f64>, center: Option<f64>) -> Self {
        self.window_width = width;
        self.window_center = center;
        self
    }

    pub fn with_drag(mut self, drag: DragBindings) -> Self {
        self.drag = drag;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn preset(&self) -> &str {
        &self.preset
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn equation(&self) -> &CompiledEquation {
        &self.equation
    }

    /// Quantitative maps needed to synthesize this type
    pub fn dependencies(&self) -> &[String] {
        self.equation.dependencies()
    }

    /// Scanner parameters at their configured defaults, in declaration order
    pub fn parameters(&self) -> &[ScannerParameter] {
        &self.parameters
    }

    pub fn default_window_width(&self) -> Option<f64> {
        self.window_width
    }

    pub fn default_window_center(&self) -> Option<f64> {
        self.window_center
    }

    pub fn drag(&self) -> &DragBindings {
        &self.drag
    }
}
