use std::sync::Arc;

use crate::evaluation::value::{Attributes, M44, SceneObject, Value};
use crate::graph::AsAny;

/// A renderer's representation of a set of attributes, shared between all
/// the objects they are applied to.
pub trait AttributesInterface: AsAny + Send + Sync {}

/// Handle to an object living in the renderer. Dropping the handle removes
/// the object from the renderer.
pub trait ObjectInterface: Send + Sync {
    fn transform(&mut self, transform: &M44);

    /// Applies new attributes to the existing object. Returns false if the
    /// backend can't edit the object in place, in which case the caller must
    /// replace the object instead.
    fn attributes(&mut self, attributes: &Arc<dyn AttributesInterface>) -> bool;

    fn assign_id(&mut self, id: u32);
}

/// The backend a `RenderController` mirrors a scene into.
pub trait Renderer: Send + Sync {
    fn name(&self) -> &str;

    /// Sets a global option; `None` removes it.
    fn option(&self, name: &str, value: Option<&Value>);

    fn attributes(&self, attributes: &Attributes) -> Arc<dyn AttributesInterface>;

    /// Creates an object named after its scene location. Returns `None` if
    /// the backend doesn't render objects of this type.
    fn object(
        &self,
        name: &str,
        object: &SceneObject,
        attributes: &Arc<dyn AttributesInterface>,
    ) -> Option<Box<dyn ObjectInterface>>;
}
