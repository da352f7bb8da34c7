//! Host collaborators backed by the Kotlin accessibility service
//!
//! Every collaborator trait is implemented over JNI calls on a single
//! host object. Calls attach the current thread to the VM on first use and
//! run inside a local frame so references never leak across iterations.
//!
//! Expected Kotlin methods:
//! - `captureScreen(): ByteArray?`, `screenWidth(): Int`, `screenHeight(): Int`
//! - `dispatchGesture(FloatArray): Boolean`, `pressBack(): Boolean`
//! - `foregroundApp(): String?`, `originApp(): String?`, `launchApp(String): Boolean`
//! - `notifyUser(String)`
//! - `recognizeText(ByteArray, Int, Int): String?`
//! - `classify(String): String?`
//! - `sendTelemetry(String): Boolean`

use image::RgbaImage;
use jni::objects::{GlobalRef, JByteArray, JObject, JString, JValue};
use jni::{JNIEnv, JavaVM};

use super::input::encode_strokes;
use crate::action::{GestureDispatcher, Stroke};
use crate::host::{AppFocus, HostError, UserNotifier};
use crate::telemetry::{TelemetryRecord, TelemetryTransport};
use crate::vision::capture::frame_from_raw;
use crate::vision::{CaptureSurface, OcrError, RemoteClassifier, RemoteRequest, RemoteResponse, TextRecognizer, VisionError};

/// Local references per call frame
const FRAME_CAPACITY: i32 = 16;

/// JNI-backed host
pub struct JniHost {
    vm: JavaVM,
    host: GlobalRef,
}

impl JniHost {
    /// Wrap the Kotlin host object
    pub fn new(env: &mut JNIEnv, host: &JObject) -> Result<Self, HostError> {
        if host.is_null() {
            return Err(HostError::Unavailable);
        }
        Ok(Self {
            vm: env.get_java_vm()?,
            host: env.new_global_ref(host)?,
        })
    }

    fn call<T, F>(&self, f: F) -> Result<T, HostError>
    where
        F: FnOnce(&mut JNIEnv, &JObject) -> Result<T, HostError>,
    {
        let mut env = self.vm.attach_current_thread_permanently()?;
        let host = self.host.as_obj();
        let result = env.with_local_frame(FRAME_CAPACITY, |env| f(env, host));

        // A pending exception poisons every later JNI call on this thread
        if env.exception_check().unwrap_or(false) {
            let _ = env.exception_describe();
            let _ = env.exception_clear();
            return Err(HostError::Call("Java exception in host call".to_string()));
        }
        result
    }

    fn call_bool(&self, method: &str, sig: &str, arg: Option<&str>) -> Result<bool, HostError> {
        self.call(|env, host| {
            let value = match arg {
                Some(s) => {
                    let s = env.new_string(s)?;
                    env.call_method(host, method, sig, &[JValue::Object(&s)])?
                }
                None => env.call_method(host, method, sig, &[])?,
            };
            Ok(value.z()?)
        })
    }

    fn call_string(&self, method: &str) -> Result<Option<String>, HostError> {
        self.call(|env, host| {
            let value = env.call_method(host, method, "()Ljava/lang/String;", &[])?.l()?;
            java_string(env, value)
        })
    }
}

fn java_string(env: &mut JNIEnv, value: JObject) -> Result<Option<String>, HostError> {
    if value.is_null() {
        return Ok(None);
    }
    let value = JString::from(value);
    let s: String = env.get_string(&value)?.into();
    Ok(Some(s))
}

impl CaptureSurface for JniHost {
    fn capture_screen(&self) -> Option<RgbaImage> {
        let captured = self.call(|env, host| {
            let frame = env.call_method(host, "captureScreen", "()[B", &[])?.l()?;
            if frame.is_null() {
                return Ok(None);
            }
            let width = env.call_method(host, "screenWidth", "()I", &[])?.i()?;
            let height = env.call_method(host, "screenHeight", "()I", &[])?.i()?;
            let bytes = env.convert_byte_array(JByteArray::from(frame))?;
            Ok(Some((bytes, width, height)))
        });

        let (bytes, width, height) = match captured {
            Ok(Some(frame)) => frame,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("captureScreen failed: {}", e);
                return None;
            }
        };
        let (Ok(width), Ok(height)) = (u32::try_from(width), u32::try_from(height)) else {
            log::warn!("Host reported invalid screen size {}x{}", width, height);
            return None;
        };
        match frame_from_raw(&bytes, width, height) {
            Ok(frame) => Some(frame),
            Err(e) => {
                log::warn!("Discarding frame: {}", e);
                None
            }
        }
    }
}

impl GestureDispatcher for JniHost {
    fn dispatch(&self, strokes: &[Stroke]) -> Result<(), HostError> {
        let encoded = encode_strokes(strokes);
        let accepted = self.call(|env, host| {
            let array = env.new_float_array(encoded.len() as i32)?;
            env.set_float_array_region(&array, 0, &encoded)?;
            Ok(env
                .call_method(host, "dispatchGesture", "([F)Z", &[JValue::Object(&array)])?
                .z()?)
        })?;
        if accepted {
            Ok(())
        } else {
            Err(HostError::GestureRejected)
        }
    }

    fn press_back(&self) -> Result<(), HostError> {
        if self.call_bool("pressBack", "()Z", None)? {
            Ok(())
        } else {
            Err(HostError::GestureRejected)
        }
    }
}

impl AppFocus for JniHost {
    fn foreground_app(&self) -> Option<String> {
        self.call_string("foregroundApp").unwrap_or_else(|e| {
            log::debug!("foregroundApp failed: {}", e);
            None
        })
    }

    fn origin_app(&self) -> Option<String> {
        self.call_string("originApp").unwrap_or_else(|e| {
            log::debug!("originApp failed: {}", e);
            None
        })
    }

    fn launch_app(&self, package: &str) -> Result<(), HostError> {
        if self.call_bool("launchApp", "(Ljava/lang/String;)Z", Some(package))? {
            Ok(())
        } else {
            Err(HostError::Call(format!("launchApp({}) refused", package)))
        }
    }
}

impl UserNotifier for JniHost {
    fn notify(&self, message: &str) {
        let sent = self.call(|env, host| {
            let message = env.new_string(message)?;
            env.call_method(host, "notifyUser", "(Ljava/lang/String;)V", &[JValue::Object(&message)])?;
            Ok(())
        });
        if let Err(e) = sent {
            log::warn!("notifyUser failed: {}", e);
        }
    }
}

impl TextRecognizer for JniHost {
    fn recognize(&self, image: &RgbaImage) -> Result<String, OcrError> {
        let (width, height) = image.dimensions();
        self.call(|env, host| {
            let pixels = env.byte_array_from_slice(image.as_raw())?;
            let text = env
                .call_method(
                    host,
                    "recognizeText",
                    "([BII)Ljava/lang/String;",
                    &[
                        JValue::Object(&pixels),
                        JValue::Int(width as i32),
                        JValue::Int(height as i32),
                    ],
                )?
                .l()?;
            java_string(env, text)
        })
        .map_err(|e| OcrError::ProcessingError(e.to_string()))?
        .ok_or(OcrError::NoTextFound)
    }
}

impl RemoteClassifier for JniHost {
    fn classify(&self, request: &RemoteRequest) -> Result<RemoteResponse, VisionError> {
        let body = serde_json::to_string(request).map_err(|e| VisionError::Remote(e.to_string()))?;
        let reply = self
            .call(|env, host| {
                let body = env.new_string(&body)?;
                let reply = env
                    .call_method(
                        host,
                        "classify",
                        "(Ljava/lang/String;)Ljava/lang/String;",
                        &[JValue::Object(&body)],
                    )?
                    .l()?;
                java_string(env, reply)
            })
            .map_err(|e| VisionError::Remote(e.to_string()))?
            .ok_or_else(|| VisionError::Remote("empty reply".to_string()))?;
        RemoteResponse::from_json(&reply)
    }
}

impl TelemetryTransport for JniHost {
    fn send_batch(&self, batch: &[TelemetryRecord]) -> Result<(), HostError> {
        let json = serde_json::to_string(batch).map_err(|e| HostError::Call(e.to_string()))?;
        if self.call_bool("sendTelemetry", "(Ljava/lang/String;)Z", Some(&json))? {
            Ok(())
        } else {
            Err(HostError::Call("sendTelemetry refused".to_string()))
        }
    }
}
