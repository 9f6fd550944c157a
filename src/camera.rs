//! V4L2カメラからフレームを取得するモジュール (`camera` feature)

use std::sync::mpsc;
use std::thread;

use anyhow::{bail, Context, Result};
use image::DynamicImage;
use log::{error, info};
use v4l::buffer::Type;
use v4l::io::{mmap::Stream, traits::CaptureStream};
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::stream::FrameSource;

enum Command {
    Capture,
    Stop,
}

/// カメラ画像を取得するための構造体
///
/// 検出処理の間もカメラのバッファを更新し続けるため、取得は別スレッドで行います。
/// そうしないと (処理時間) * (バッファ数) だけ古い画像が返ってきます。
pub struct CameraSource {
    /// スレッドハンドル
    thread_handle: Option<thread::JoinHandle<()>>,
    /// コマンドのsender
    cmd_tx: mpsc::Sender<Command>,
    /// カメラ画像のreceiver
    cam_img_rx: mpsc::Receiver<Result<DynamicImage>>,
}

impl CameraSource {
    /// カメラを開き、取得スレッドを開始します。
    ///
    /// # Args
    /// * `index` - `/dev/video<index>`
    /// * `frame_width`, `frame_height` - 要求する解像度
    pub fn open(index: usize, frame_width: u32, frame_height: u32) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (cam_img_tx, cam_img_rx) = mpsc::channel();

        let thread_handle = Some(thread::spawn(move || {
            if let Err(e) =
                Self::run_cam_thread(index, cmd_rx, cam_img_tx.clone(), frame_width, frame_height)
            {
                error!("camera {} stopped: {:#}", index, e);
                let _ = cam_img_tx.send(Err(e));
            }
        }));
        Self {
            thread_handle,
            cmd_tx,
            cam_img_rx,
        }
    }

    /// スレッドの中身
    fn run_cam_thread(
        index: usize,
        cmd_rx: mpsc::Receiver<Command>,
        cam_img_tx: mpsc::Sender<Result<DynamicImage>>,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<()> {
        let mut dev = Device::new(index).with_context(|| format!("can't open camera {}", index))?;

        let mut fmt = dev.format()?;
        fmt.width = frame_width;
        fmt.height = frame_height;
        fmt.fourcc = FourCC::new(b"MJPG");
        let fmt = dev.set_format(&fmt)?;
        info!("camera {}: {}x{}", index, fmt.width, fmt.height);

        let mut cam_stream = Stream::with_buffers(&mut dev, Type::VideoCapture, 3)?;

        loop {
            let (frame, _meta) = CaptureStream::next(&mut cam_stream)?;

            match cmd_rx.try_recv() {
                Ok(Command::Capture) => {
                    let img = image::load_from_memory(frame).context("can't decode camera frame");
                    if cam_img_tx.send(img).is_err() {
                        break;
                    }
                }
                Ok(Command::Stop) | Err(mpsc::TryRecvError::Disconnected) => break,
                Err(mpsc::TryRecvError::Empty) => {}
            }
            thread::yield_now();
        }
        Ok(())
    }

    /// スレッドを停止します。
    pub fn stop(&mut self) -> Result<()> {
        if let Some(handle) = self.thread_handle.take() {
            let _ = self.cmd_tx.send(Command::Stop);
            if handle.join().is_err() {
                bail!("can't join camera thread");
            }
        }
        Ok(())
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        if self.thread_handle.is_none() {
            return Ok(None);
        }
        if self.cmd_tx.send(Command::Capture).is_err() {
            return Ok(None);
        }
        match self.cam_img_rx.recv() {
            Ok(img) => img.map(Some),
            // スレッドが終了している
            Err(_) => Ok(None),
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
