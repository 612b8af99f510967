// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The graphics device and its resettable resources.

use crate::registry::{ChildRegistration, ChildRegistry, DeviceChild};
use crate::DeviceState;
use ferret_core::FerretError;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// An opaque native handle issued by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(pub u64);

/// The native graphics API behind a [`GraphDevice`].
pub trait GraphBackend {
    /// Creates a native device.
    fn create_device(&mut self) -> Result<NativeHandle, FerretError>;

    /// Destroys a native device.
    fn destroy_device(&mut self, device: NativeHandle);

    /// Returns `true` if `device` was removed or reset by the system.
    fn is_device_lost(&self, device: NativeHandle) -> bool;

    /// Creates a texture on `device`.
    ///
    /// ## Errors
    /// * `FerretError::DeviceLost` - if the device is gone.
    fn create_texture(
        &mut self,
        device: NativeHandle,
        desc: &TextureDesc,
    ) -> Result<NativeHandle, FerretError>;

    /// Creates a render target on `device`.
    fn create_render_target(
        &mut self,
        device: NativeHandle,
        desc: &RenderTargetDesc,
    ) -> Result<NativeHandle, FerretError>;

    /// Releases a texture or render target.
    fn release(&mut self, resource: NativeHandle);

    /// Presents the back buffer.
    ///
    /// ## Errors
    /// * `FerretError::DeviceLost` - if the device was lost while presenting.
    fn present(&mut self, device: NativeHandle, vsync: bool) -> Result<(), FerretError>;
}

struct GraphInner {
    name: String,
    backend: RefCell<Box<dyn GraphBackend>>,
    native: Cell<Option<NativeHandle>>,
    state: Cell<DeviceState>,
    generation: Cell<u64>,
    children: ChildRegistry,
}

impl Drop for GraphInner {
    fn drop(&mut self) {
        if let Some(native) = self.native.take() {
            self.backend.get_mut().destroy_device(native);
        }
    }
}

/// A graphics device with a stable identity across native device loss.
///
/// Cloning yields another handle to the same device.
#[derive(Clone)]
pub struct GraphDevice {
    inner: Rc<GraphInner>,
}

impl GraphDevice {
    /// Creates the device and its native handle.
    pub fn new(name: impl Into<String>, mut backend: Box<dyn GraphBackend>) -> Result<Self, FerretError> {
        let name = name.into();
        let native = backend.create_device()?;
        log::info!("Graph device '{name}' created.");
        Ok(Self {
            inner: Rc::new(GraphInner {
                name,
                backend: RefCell::new(backend),
                native: Cell::new(Some(native)),
                state: Cell::new(DeviceState::Valid),
                generation: Cell::new(1),
                children: ChildRegistry::new(),
            }),
        })
    }

    /// The device name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The current lifecycle state.
    pub fn state(&self) -> DeviceState {
        self.inner.state.get()
    }

    /// Returns `true` if the native handle is usable.
    pub fn is_valid(&self) -> bool {
        self.state() == DeviceState::Valid
    }

    /// Incremented every time the native handle is recreated.
    pub fn generation(&self) -> u64 {
        self.inner.generation.get()
    }

    /// The current native handle.
    pub fn native(&self) -> Option<NativeHandle> {
        self.inner.native.get()
    }

    /// Number of registered children.
    pub fn child_count(&self) -> usize {
        self.inner.children.len()
    }

    /// Returns `true` if both handles refer to the same device.
    pub fn same_device(&self, other: &GraphDevice) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Asks the backend whether the native device was lost.
    pub fn check_device(&self) -> DeviceState {
        if self.is_valid() {
            let lost = match self.native() {
                Some(native) => self.inner.backend.borrow().is_device_lost(native),
                None => true,
            };
            if lost {
                self.mark_lost();
            }
        }
        self.state()
    }

    /// Records that the native device is gone. A destroyed device stays destroyed.
    pub fn mark_lost(&self) {
        if self.is_valid() {
            log::warn!("Graph device '{}' lost.", self.inner.name);
            self.inner.state.set(DeviceState::Lost);
        }
    }

    /// Recreates the native device, then resets every live child in
    /// registration order.
    ///
    /// Safe to call on a valid device; the native handle is rebuilt anyway.
    ///
    /// ## Returns
    /// The number of children that failed to reset.
    ///
    /// ## Errors
    /// * `FerretError::DeviceDestroyed` - after [`destroy`](Self::destroy).
    /// * Any backend error while creating the native device; the device stays lost.
    pub fn reset(&self) -> Result<usize, FerretError> {
        if self.state() == DeviceState::Destroyed {
            return Err(FerretError::DeviceDestroyed(self.inner.name.clone()));
        }

        {
            let mut backend = self.inner.backend.borrow_mut();
            if let Some(old) = self.inner.native.take() {
                backend.destroy_device(old);
            }
            match backend.create_device() {
                Ok(native) => self.inner.native.set(Some(native)),
                Err(e) => {
                    self.inner.state.set(DeviceState::Lost);
                    log::error!("Graph device '{}' could not be recreated: {e}", self.inner.name);
                    return Err(e);
                }
            }
        }
        self.inner.generation.set(self.generation() + 1);
        self.inner.state.set(DeviceState::Valid);

        let failures = self.inner.children.reset_all();
        log::info!(
            "Graph device '{}' reset ({} children, {} failed).",
            self.inner.name,
            self.child_count(),
            failures
        );
        Ok(failures)
    }

    /// Releases the native device for good.
    pub fn destroy(&self) {
        if self.state() == DeviceState::Destroyed {
            return;
        }
        if let Some(native) = self.inner.native.take() {
            self.inner.backend.borrow_mut().destroy_device(native);
        }
        self.inner.state.set(DeviceState::Destroyed);
        log::info!("Graph device '{}' destroyed.", self.inner.name);
    }

    /// Presents the back buffer; marks the device lost if the backend reports it.
    pub fn present(&self, vsync: bool) -> Result<(), FerretError> {
        let native = self.valid_native()?;
        let result = self.inner.backend.borrow_mut().present(native, vsync);
        if let Err(FerretError::DeviceLost(_)) = &result {
            self.mark_lost();
        }
        result
    }

    fn valid_native(&self) -> Result<NativeHandle, FerretError> {
        match (self.state(), self.native()) {
            (DeviceState::Valid, Some(native)) => Ok(native),
            (DeviceState::Destroyed, _) => Err(FerretError::DeviceDestroyed(self.inner.name.clone())),
            _ => Err(FerretError::DeviceLost(self.inner.name.clone())),
        }
    }

    fn release(&self, resource: NativeHandle) {
        self.inner.backend.borrow_mut().release(resource);
    }
}

impl std::fmt::Debug for GraphDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphDevice")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("generation", &self.generation())
            .field("children", &self.child_count())
            .finish()
    }
}

/// Describes a texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    /// Debug label.
    pub label: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Describes a render target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTargetDesc {
    /// Debug label.
    pub label: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Number of back buffers.
    pub buffers: u32,
}

/// What a resource needs to rebuild itself.
trait ResourceDesc: Clone + 'static {
    fn label(&self) -> &str;
    fn create(&self, device: &GraphDevice) -> Result<NativeHandle, FerretError>;
}

impl ResourceDesc for TextureDesc {
    fn label(&self) -> &str {
        &self.label
    }

    fn create(&self, device: &GraphDevice) -> Result<NativeHandle, FerretError> {
        let native = device.valid_native()?;
        device.inner.backend.borrow_mut().create_texture(native, self)
    }
}

impl ResourceDesc for RenderTargetDesc {
    fn label(&self) -> &str {
        &self.label
    }

    fn create(&self, device: &GraphDevice) -> Result<NativeHandle, FerretError> {
        let native = device.valid_native()?;
        device.inner.backend.borrow_mut().create_render_target(native, self)
    }
}

struct ResourceState<D: ResourceDesc> {
    device: GraphDevice,
    desc: D,
    native: Option<NativeHandle>,
    generation: u64,
}

impl<D: ResourceDesc> ResourceState<D> {
    fn rebuild(&mut self) -> Result<(), FerretError> {
        if let Some(old) = self.native.take() {
            self.device.release(old);
        }
        self.native = Some(self.desc.create(&self.device)?);
        self.generation = self.device.generation();
        Ok(())
    }
}

impl<D: ResourceDesc> DeviceChild for ResourceState<D> {
    fn reset(&mut self) -> Result<(), FerretError> {
        self.rebuild()
    }

    fn is_valid(&self) -> bool {
        self.native.is_some()
            && self.generation == self.device.generation()
            && self.device.is_valid()
    }

    fn label(&self) -> &str {
        self.desc.label()
    }
}

impl<D: ResourceDesc> Drop for ResourceState<D> {
    fn drop(&mut self) {
        if let Some(native) = self.native.take() {
            self.device.release(native);
        }
    }
}

struct Resource<D: ResourceDesc> {
    state: Rc<RefCell<ResourceState<D>>>,
    _registration: ChildRegistration,
}

impl<D: ResourceDesc> Resource<D> {
    fn new(device: &GraphDevice, desc: D) -> Result<Self, FerretError> {
        let mut state = ResourceState {
            device: device.clone(),
            desc,
            native: None,
            generation: 0,
        };
        state.rebuild()?;
        let state = Rc::new(RefCell::new(state));
        let child: Rc<RefCell<dyn DeviceChild>> = state.clone();
        let registration = device.inner.children.register(&child);
        Ok(Self {
            state,
            _registration: registration,
        })
    }

    fn is_valid(&self) -> bool {
        self.state.borrow().is_valid()
    }

    fn native(&self) -> Option<NativeHandle> {
        self.state.borrow().native
    }

    fn desc(&self) -> D {
        self.state.borrow().desc.clone()
    }

    fn reset(&self) -> Result<(), FerretError> {
        self.state.borrow_mut().rebuild()
    }
}

/// A texture that rebuilds itself when its device is reset.
pub struct Texture(Resource<TextureDesc>);

impl Texture {
    /// Creates the texture on `device` and registers it.
    pub fn new(device: &GraphDevice, desc: TextureDesc) -> Result<Self, FerretError> {
        Resource::new(device, desc).map(Self)
    }

    /// Returns `true` if the texture has a handle on the current device.
    pub fn is_valid(&self) -> bool {
        self.0.is_valid()
    }

    /// The native texture handle.
    pub fn native(&self) -> Option<NativeHandle> {
        self.0.native()
    }

    /// The texture description.
    pub fn desc(&self) -> TextureDesc {
        self.0.desc()
    }

    /// Rebuilds the native texture against the current device handle.
    pub fn reset(&self) -> Result<(), FerretError> {
        self.0.reset()
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("desc", &self.desc())
            .field("native", &self.native())
            .finish()
    }
}

/// A render target that rebuilds itself when its device is reset.
pub struct RenderTarget(Resource<RenderTargetDesc>);

impl RenderTarget {
    /// Creates the render target on `device` and registers it.
    pub fn new(device: &GraphDevice, desc: RenderTargetDesc) -> Result<Self, FerretError> {
        Resource::new(device, desc).map(Self)
    }

    /// Returns `true` if the target has a handle on the current device.
    pub fn is_valid(&self) -> bool {
        self.0.is_valid()
    }

    /// The native handle.
    pub fn native(&self) -> Option<NativeHandle> {
        self.0.native()
    }

    /// The target description.
    pub fn desc(&self) -> RenderTargetDesc {
        self.0.desc()
    }

    /// Rebuilds the native target, e.g. after a resize.
    pub fn reset(&self) -> Result<(), FerretError> {
        self.0.reset()
    }
}

impl std::fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTarget")
            .field("desc", &self.desc())
            .field("native", &self.native())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessControl, HeadlessGraphBackend};

    fn device() -> (GraphDevice, HeadlessControl) {
        let (backend, control) = HeadlessGraphBackend::new();
        (GraphDevice::new("test", Box::new(backend)).unwrap(), control)
    }

    fn texture(device: &GraphDevice, label: &str) -> Texture {
        Texture::new(
            device,
            TextureDesc {
                label: label.to_owned(),
                width: 4,
                height: 4,
            },
        )
        .unwrap()
    }

    #[test]
    fn reset_revalidates_every_child() {
        let (device, control) = device();
        let a = texture(&device, "a");
        let b = texture(&device, "b");
        let target = RenderTarget::new(
            &device,
            RenderTargetDesc {
                label: "back".into(),
                width: 8,
                height: 8,
                buffers: 2,
            },
        )
        .unwrap();
        let identity = device.clone();

        control.lose_device();
        assert_eq!(device.check_device(), DeviceState::Lost);
        assert!(!a.is_valid() && !b.is_valid() && !target.is_valid());
        assert!(Texture::new(
            &device,
            TextureDesc {
                label: "late".into(),
                width: 1,
                height: 1
            }
        )
        .is_err());

        let old = a.native();
        assert_eq!(device.reset().unwrap(), 0);
        assert!(a.is_valid() && b.is_valid() && target.is_valid());
        assert_ne!(a.native(), old, "children rebuild against the new handle");
        assert!(device.same_device(&identity));
    }

    #[test]
    fn reset_is_idempotent_and_leak_free() {
        let (device, control) = device();
        let _a = texture(&device, "a");
        let _b = texture(&device, "b");
        let live = control.live_handles();
        assert_eq!(live, 3);

        device.reset().unwrap();
        device.reset().unwrap();
        assert_eq!(control.live_handles(), live);
    }

    #[test]
    fn dropped_children_deregister_and_release() {
        let (device, control) = device();
        let a = texture(&device, "a");
        assert_eq!(device.child_count(), 1);
        drop(a);
        assert_eq!(device.child_count(), 0);
        assert_eq!(control.live_handles(), 1);
    }

    #[test]
    fn failed_recreate_leaves_device_lost() {
        let (device, control) = device();
        control.lose_device();
        control.fail_next_create();
        assert!(device.reset().is_err());
        assert_eq!(device.state(), DeviceState::Lost);
        assert_eq!(device.reset().unwrap(), 0);
        assert!(device.is_valid());
    }

    #[test]
    fn destroyed_devices_stay_invalid() {
        let (device, _control) = device();
        let a = texture(&device, "a");
        device.destroy();
        assert!(!a.is_valid());
        device.mark_lost();
        assert_eq!(device.state(), DeviceState::Destroyed);
        assert!(matches!(device.reset(), Err(FerretError::DeviceDestroyed(_))));
        assert!(matches!(device.present(true), Err(FerretError::DeviceDestroyed(_))));
    }

    #[test]
    fn present_detects_loss() {
        let (device, control) = device();
        device.present(false).unwrap();
        control.lose_device();
        assert!(matches!(device.present(false), Err(FerretError::DeviceLost(_))));
        assert_eq!(device.state(), DeviceState::Lost);
        assert_eq!(control.presents(), 1);
    }
}
