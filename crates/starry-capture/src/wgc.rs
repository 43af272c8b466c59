//! Windows.Graphics.Capture (WGC) window capture backend.
//!
//! Requires Windows 10 1903+ (build 18362) for `CreateForWindow`.
//!
//! # Threading model
//!
//! The frame pool is free-threaded: `FrameArrived` and `Closed` fire on a
//! thread-pool thread. Each frame is read back to the CPU on that thread and
//! pushed straight into the [`FrameHandler`]; nothing here queues frames.

use std::ffi::c_void;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use bytes::Bytes;
use starry_core::{
    now_ms, CaptureError, CaptureSettings, PixelFormat, RawFrame, WindowHandle, WindowTarget,
};
use windows::{
    core::*,
    Foundation::TypedEventHandler,
    Graphics::{
        Capture::{Direct3D11CaptureFramePool, GraphicsCaptureItem, GraphicsCaptureSession},
        DirectX::{Direct3D11::IDirect3DDevice, DirectXPixelFormat},
        SizeInt32,
    },
    Win32::{
        Foundation::{BOOL, HWND, LPARAM},
        Graphics::{
            Direct3D::D3D_DRIVER_TYPE_HARDWARE,
            Direct3D11::{
                D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
                D3D11_BIND_FLAG, D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                D3D11_MAPPED_SUBRESOURCE, D3D11_MAP_READ, D3D11_RESOURCE_MISC_FLAG,
                D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING,
            },
            Dwm::{DwmGetWindowAttribute, DWMWA_CLOAKED},
            Dxgi::{
                Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC},
                IDXGIDevice,
            },
        },
        System::WinRT::{
            Direct3D11::CreateDirect3D11DeviceFromDXGIDevice,
            Graphics::Capture::IGraphicsCaptureItemInterop,
            RoInitialize, RO_INIT_MULTITHREADED,
        },
        UI::WindowsAndMessaging::{
            EnumWindows, GetWindowLongPtrW, GetWindowTextW, IsWindow, IsWindowVisible,
            GWL_EXSTYLE, GWL_STYLE, WS_DISABLED, WS_EX_TOOLWINDOW,
        },
    },
};

use crate::{BoundCapture, CaptureBackend, FrameHandler};

const BUFFER_COUNT: i32 = 2;

// ── PlatformBackend ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct PlatformBackend;

impl PlatformBackend {
    pub fn new() -> Self {
        // Initialise WinRT on this thread (no-op if already done)
        unsafe {
            let _ = RoInitialize(RO_INIT_MULTITHREADED);
        }
        Self
    }
}

impl CaptureBackend for PlatformBackend {
    fn list_windows(&self) -> Result<Vec<WindowTarget>, CaptureError> {
        enumerate_windows()
    }

    fn bind(
        &self,
        target: &WindowTarget,
        settings: &CaptureSettings,
        handler: Arc<dyn FrameHandler>,
    ) -> Result<Box<dyn BoundCapture>, CaptureError> {
        let capture = WgcCapture::open(target, settings, handler).map_err(|e| {
            CaptureError::BindFailed { reason: format!("{e:#}") }
        })?;
        Ok(Box::new(capture))
    }
}

// ── WgcCapture ────────────────────────────────────────────────────────────────

/// GPU → CPU readback state, touched only from the frame pool thread.
struct Readback {
    device:  ID3D11Device,
    context: ID3D11DeviceContext,
    staging: Option<(ID3D11Texture2D, u32, u32)>,
}

// The immediate context is not thread-safe; `Readback` lives behind a Mutex.
unsafe impl Send for Readback {}

struct WgcCapture {
    handle:         WindowHandle,
    item:           GraphicsCaptureItem,
    pool:           Direct3D11CaptureFramePool,
    session:        GraphicsCaptureSession,
    closed_token:   i64,
    arrived_token:  i64,
}

impl WgcCapture {
    fn open(
        target: &WindowTarget,
        settings: &CaptureSettings,
        handler: Arc<dyn FrameHandler>,
    ) -> Result<Self> {
        let hwnd = HWND(target.handle.0 as usize as *mut c_void);
        if !unsafe { IsWindow(hwnd) }.as_bool() {
            anyhow::bail!("window {} no longer exists", target.handle);
        }
        if !GraphicsCaptureSession::IsSupported().context("GraphicsCaptureSession::IsSupported")? {
            anyhow::bail!("Windows.Graphics.Capture is not supported on this system");
        }

        // ── 1. Create D3D11 device ─────────────────────────────────────────
        let mut d3d_device: Option<ID3D11Device> = None;
        unsafe {
            D3D11CreateDevice(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                None,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None,
                D3D11_SDK_VERSION,
                Some(&mut d3d_device),
                None,
                None,
            )
            .context("D3D11CreateDevice")?;
        }
        let d3d_device = d3d_device.context("D3D11CreateDevice returned no device")?;
        let context = unsafe { d3d_device.GetImmediateContext() }.context("GetImmediateContext")?;

        // ── 2. Wrap D3D11 device as WinRT IDirect3DDevice ─────────────────
        let dxgi_device: IDXGIDevice = d3d_device.cast().context("cast IDXGIDevice")?;
        let winrt_device: IDirect3DDevice = unsafe {
            CreateDirect3D11DeviceFromDXGIDevice(&dxgi_device)
                .context("CreateDirect3D11DeviceFromDXGIDevice")?
        }
        .cast()
        .context("cast IDirect3DDevice")?;

        // ── 3. Create GraphicsCaptureItem from HWND ───────────────────────
        let interop: IGraphicsCaptureItemInterop =
            windows::core::factory::<GraphicsCaptureItem, IGraphicsCaptureItemInterop>()
                .context("IGraphicsCaptureItemInterop factory")?;
        let item: GraphicsCaptureItem =
            unsafe { interop.CreateForWindow(hwnd).context("CreateForWindow")? };
        let item_size: SizeInt32 = item.Size().context("GraphicsCaptureItem::Size")?;
        tracing::info!(
            "WGC item for {} is {}x{}",
            target, item_size.Width, item_size.Height
        );

        // ── 4. Create frame pool + session ────────────────────────────────
        let pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
            &winrt_device,
            DirectXPixelFormat::B8G8R8A8UIntNormalized,
            BUFFER_COUNT,
            item_size,
        )
        .context("CreateFreeThreaded frame pool")?;
        let session = pool.CreateCaptureSession(&item).context("CreateCaptureSession")?;
        // Both setters need newer Windows builds; older ones keep their defaults.
        let _ = session.SetIsCursorCaptureEnabled(settings.capture_cursor);
        let _ = session.SetIsBorderRequired(settings.draw_border);

        // ── 5. Closed → FrameHandler::on_closed ───────────────────────────
        let closed_handler = Arc::clone(&handler);
        let display = target.to_string();
        let closed_token = item
            .Closed(&TypedEventHandler::<GraphicsCaptureItem, IInspectable>::new(move |_, _| {
                closed_handler.on_closed(format!("window {display} was closed"));
                Ok(())
            }))
            .context("GraphicsCaptureItem::Closed handler")?;

        // ── 6. FrameArrived → readback → FrameHandler ─────────────────────
        let readback = Mutex::new(Readback { device: d3d_device, context, staging: None });
        let last_size = Mutex::new(item_size);
        let arrived_token = pool
            .FrameArrived(&TypedEventHandler::new(
                move |pool_ref: &Option<Direct3D11CaptureFramePool>, _| {
                    let Some(pool_ref) = pool_ref else { return Ok(()) };
                    let frame = match pool_ref.TryGetNextFrame() {
                        Ok(f) => f,
                        Err(_) => return Ok(()),
                    };

                    // Window resized: frames of the new size arrive after Recreate.
                    let content = frame.ContentSize()?;
                    {
                        let mut last = last_size.lock().unwrap_or_else(|p| p.into_inner());
                        if content.Width != last.Width || content.Height != last.Height {
                            tracing::debug!(
                                "WGC content resized {}x{} → {}x{}",
                                last.Width, last.Height, content.Width, content.Height
                            );
                            *last = content;
                            pool_ref.Recreate(
                                &winrt_device,
                                DirectXPixelFormat::B8G8R8A8UIntNormalized,
                                BUFFER_COUNT,
                                content,
                            )?;
                            return Ok(());
                        }
                    }

                    let surface = frame.Surface()?;
                    let access: windows::Win32::System::WinRT::Direct3D11::IDirect3DDxgiInterfaceAccess =
                        surface.cast()?;
                    let texture: ID3D11Texture2D = unsafe { access.GetInterface()? };

                    let mut rb = readback.lock().unwrap_or_else(|p| p.into_inner());
                    match read_texture(&mut rb, &texture) {
                        Ok(raw) => handler.on_frame_arrived(raw),
                        Err(e) => tracing::warn!("WGC readback failed: {:#}", e),
                    }
                    Ok(())
                },
            ))
            .context("FrameArrived handler")?;

        // ── 7. Start capture ──────────────────────────────────────────────
        session.StartCapture().context("StartCapture")?;
        tracing::info!("WGC capture started for {}", target);

        Ok(Self {
            handle: target.handle,
            item,
            pool,
            session,
            closed_token,
            arrived_token,
        })
    }
}

impl BoundCapture for WgcCapture {
    fn handle(&self) -> WindowHandle {
        self.handle
    }
}

impl Drop for WgcCapture {
    fn drop(&mut self) {
        let _ = self.item.RemoveClosed(self.closed_token);
        let _ = self.pool.RemoveFrameArrived(self.arrived_token);
        let _ = self.session.Close();
        let _ = self.pool.Close();
        tracing::info!("WGC capture released for {}", self.handle);
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Copy a GPU texture into a `RawFrame`, keeping the driver's row pitch as stride.
fn read_texture(rb: &mut Readback, texture: &ID3D11Texture2D) -> Result<RawFrame> {
    let mut desc = D3D11_TEXTURE2D_DESC::default();
    unsafe { texture.GetDesc(&mut desc) };
    let (w, h) = (desc.Width, desc.Height);

    let staging = match &rb.staging {
        Some((tex, sw, sh)) if *sw == w && *sh == h => tex.clone(),
        _ => {
            let tex = create_staging_texture(&rb.device, w, h)?;
            rb.staging = Some((tex.clone(), w, h));
            tex
        }
    };

    unsafe { rb.context.CopyResource(&staging, texture) };

    let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
    unsafe {
        rb.context
            .Map(&staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
            .context("Map staging texture")?;
    }
    let stride = mapped.RowPitch as usize;
    let len = stride * (h as usize - 1) + w as usize * 4;
    let data = unsafe { std::slice::from_raw_parts(mapped.pData as *const u8, len) }.to_vec();
    unsafe { rb.context.Unmap(&staging, 0) };

    Ok(RawFrame {
        data: Bytes::from(data),
        stride,
        format: PixelFormat::Bgra8,
        width: w,
        height: h,
        captured_at_ms: now_ms(),
    })
}

/// Create a CPU-readable staging texture matching (w×h, BGRA8).
fn create_staging_texture(device: &ID3D11Device, w: u32, h: u32) -> Result<ID3D11Texture2D> {
    let desc = D3D11_TEXTURE2D_DESC {
        Width:          w,
        Height:         h,
        MipLevels:      1,
        ArraySize:      1,
        Format:         DXGI_FORMAT_B8G8R8A8_UNORM,
        SampleDesc:     DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        Usage:          D3D11_USAGE_STAGING,
        BindFlags:      D3D11_BIND_FLAG(0).0 as u32,
        CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
        MiscFlags:      D3D11_RESOURCE_MISC_FLAG(0).0 as u32,
    };
    let mut tex: Option<ID3D11Texture2D> = None;
    unsafe { device.CreateTexture2D(&desc, None, Some(&mut tex))? };
    tex.context("CreateTexture2D staging")
}

/// Visible, uncloaked, enabled, non-tool top-level windows with a title.
fn enumerate_windows() -> Result<Vec<WindowTarget>, CaptureError> {
    unsafe extern "system" fn cb(hwnd: HWND, data: LPARAM) -> BOOL {
        if !unsafe { IsWindowVisible(hwnd) }.as_bool() {
            return BOOL(1);
        }

        let mut cloaked = 0u32;
        let _ = unsafe {
            DwmGetWindowAttribute(
                hwnd,
                DWMWA_CLOAKED,
                &mut cloaked as *mut u32 as *mut c_void,
                std::mem::size_of::<u32>() as u32,
            )
        };
        if cloaked != 0 {
            return BOOL(1);
        }

        let style = unsafe { GetWindowLongPtrW(hwnd, GWL_STYLE) } as u32;
        let ex_style = unsafe { GetWindowLongPtrW(hwnd, GWL_EXSTYLE) } as u32;
        if style & WS_DISABLED.0 != 0 || ex_style & WS_EX_TOOLWINDOW.0 != 0 {
            return BOOL(1);
        }

        let mut buf = [0u16; 512];
        let len = unsafe { GetWindowTextW(hwnd, &mut buf) } as usize;
        if len == 0 {
            return BOOL(1);
        }

        let list = data.0 as *mut Vec<WindowTarget>;
        let name = String::from_utf16_lossy(&buf[..len]);
        let handle = WindowHandle(hwnd.0 as usize as u64);
        unsafe { (*list).push(WindowTarget::new(name, handle)) };
        BOOL(1)
    }

    let mut list: Vec<WindowTarget> = Vec::new();
    unsafe { EnumWindows(Some(cb), LPARAM(&mut list as *mut _ as isize)) }.map_err(|e| {
        tracing::warn!("EnumWindows failed: {}", e);
        CaptureError::Enumeration { reason: e.to_string() }
    })?;
    tracing::debug!("Enumerated {} capturable windows", list.len());
    Ok(list)
}
