//! ComfyUI img2vid node graph.
//!
//! Builds the API-format prompt for Stable Video Diffusion: checkpoint
//! loader, conditioning on the uploaded image, KSampler, VAE decode and a
//! Video Helper Suite combine node that writes an H.264 MP4.

use i2v_models::GenerationParams;
use serde_json::{json, Value};

/// Node id of the video combine node, whose output holds the MP4.
pub const VIDEO_OUTPUT_NODE: &str = "7";

const MIN_CFG: f64 = 1.0;
const OUTPUT_CRF: u32 = 19;

/// Build the prompt graph for one generation.
pub fn build_img2vid_workflow(
    params: &GenerationParams,
    checkpoint: &str,
    input_image: &str,
    filename_prefix: &str,
) -> Value {
    json!({
        "1": {
            "class_type": "ImageOnlyCheckpointLoader",
            "inputs": { "ckpt_name": checkpoint }
        },
        "2": {
            "class_type": "LoadImage",
            "inputs": { "image": input_image }
        },
        "3": {
            "class_type": "SVD_img2vid_Conditioning",
            "inputs": {
                "clip_vision": ["1", 1],
                "init_image": ["2", 0],
                "vae": ["1", 2],
                "width": params.width,
                "height": params.height,
                "video_frames": params.num_frames,
                "motion_bucket_id": params.motion_bucket_id,
                "fps": params.fps,
                "augmentation_level": params.noise_aug_strength
            }
        },
        "4": {
            "class_type": "VideoLinearCFGGuidance",
            "inputs": { "model": ["1", 0], "min_cfg": MIN_CFG }
        },
        "5": {
            "class_type": "KSampler",
            "inputs": {
                "model": ["4", 0],
                "positive": ["3", 0],
                "negative": ["3", 1],
                "latent_image": ["3", 2],
                "seed": params.seed,
                "steps": params.steps,
                "cfg": params.cfg,
                "sampler_name": params.sampler_name,
                "scheduler": params.scheduler,
                "denoise": 1.0
            }
        },
        "6": {
            "class_type": "VAEDecode",
            "inputs": { "samples": ["5", 0], "vae": ["1", 2] }
        },
        VIDEO_OUTPUT_NODE: {
            "class_type": "VHS_VideoCombine",
            "inputs": {
                "images": ["6", 0],
                "frame_rate": params.fps,
                "loop_count": 0,
                "filename_prefix": filename_prefix,
                "format": "video/h264-mp4",
                "pix_fmt": "yuv420p",
                "crf": OUTPUT_CRF,
                "save_metadata": false,
                "pingpong": false,
                "save_output": true
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> GenerationParams {
        GenerationParams::from_input_with_default_seed(
            &json!({
                "image_url": "https://x/y.png",
                "num_frames": 14,
                "motion_bucket_id": 180,
                "seed": 7
            }),
            0,
        )
        .unwrap()
    }

    #[test]
    fn test_workflow_carries_parameters() {
        let wf = build_img2vid_workflow(&params(), "svd_xt.safetensors", "in.png", "i2v/job-1");

        assert_eq!(wf["1"]["inputs"]["ckpt_name"], "svd_xt.safetensors");
        assert_eq!(wf["2"]["inputs"]["image"], "in.png");

        let cond = &wf["3"]["inputs"];
        assert_eq!(cond["width"], 1024);
        assert_eq!(cond["height"], 576);
        assert_eq!(cond["video_frames"], 14);
        assert_eq!(cond["motion_bucket_id"], 180);
        assert_eq!(cond["fps"], 7);

        let sampler = &wf["5"]["inputs"];
        assert_eq!(sampler["seed"], 7);
        assert_eq!(sampler["steps"], 20);
        assert_eq!(sampler["sampler_name"], "euler");
        assert_eq!(sampler["scheduler"], "karras");
    }

    #[test]
    fn test_workflow_links_nodes() {
        let wf = build_img2vid_workflow(&params(), "ckpt", "in.png", "prefix");

        assert_eq!(wf["5"]["inputs"]["model"], json!(["4", 0]));
        assert_eq!(wf["6"]["inputs"]["samples"], json!(["5", 0]));

        let combine = &wf[VIDEO_OUTPUT_NODE];
        assert_eq!(combine["class_type"], "VHS_VideoCombine");
        assert_eq!(combine["inputs"]["images"], json!(["6", 0]));
        assert_eq!(combine["inputs"]["format"], "video/h264-mp4");
        assert_eq!(combine["inputs"]["filename_prefix"], "prefix");
    }
}
