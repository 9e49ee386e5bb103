use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

use pix_album::collage_generator::{
    generate_album_collage, generate_collage, Collage, CollageFormat, GridLayout,
};
use pix_album::db::{create_in_memory_pool, Album, NewAlbum, NewPhoto, NewUser, Photo, User};
use pix_album::media_store::{photo_key, FsMediaStore, MediaStore, MemoryMediaStore};

fn jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buffer, ImageFormat::Jpeg)
        .unwrap();
    buffer.into_inner()
}

#[test]
fn test_grid_for_common_counts() {
    let cases = [(1, 1, 1), (2, 2, 1), (3, 2, 2), (4, 2, 2), (5, 3, 2), (9, 3, 3), (10, 4, 3)];
    for (count, columns, rows) in cases {
        assert_eq!(
            GridLayout::for_count(count),
            Some(GridLayout { columns, rows }),
            "count {}",
            count
        );
    }
    assert_eq!(GridLayout::for_count(0), None);
}

#[test]
fn test_mixed_sources_produce_one_canvas() {
    let photos = vec![
        jpeg(640, 480, [200, 30, 30]),
        jpeg(16, 16, [30, 200, 30]),
        b"definitely not a jpeg".to_vec(),
        jpeg(300, 900, [30, 30, 200]),
    ];

    let output = generate_collage(&photos, 64, CollageFormat::Jpeg)
        .unwrap()
        .unwrap();

    assert_eq!(output.placed, 3);
    assert_eq!(output.skipped, 1);
    assert_eq!((output.width, output.height), (128, 128));
    assert_eq!(output.filename, "collage.jpg");

    let decoded = image::load_from_memory_with_format(&output.bytes, ImageFormat::Jpeg).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (128, 128));
}

#[tokio::test]
async fn test_album_collage_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsMediaStore::new(dir.path());
    let pool = create_in_memory_pool().await.unwrap();

    let user = User::create(
        &pool,
        &NewUser {
            username: "maria".to_string(),
            email: "maria@example.com".to_string(),
            is_premium: false,
            is_staff: false,
        },
    )
    .await
    .unwrap();
    let album = Album::create(
        &pool,
        user.id,
        &NewAlbum {
            title: "Lisbon".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    for (i, color) in [[255, 0, 0], [0, 255, 0]].into_iter().enumerate() {
        let key = photo_key(album.id, &format!("{}.jpg", i));
        store.save(&key, &jpeg(50, 50, color)).await.unwrap();
        Photo::create(
            &pool,
            &NewPhoto {
                album_id: album.id,
                title: format!("photo {}", i),
                description: String::new(),
                storage_key: key,
                file_size: 0,
                width: 50,
                height: 50,
                mime_type: "image/jpeg".to_string(),
            },
        )
        .await
        .unwrap();
    }

    // A record whose file is gone is skipped, not fatal
    Photo::create(
        &pool,
        &NewPhoto {
            album_id: album.id,
            title: "lost".to_string(),
            description: String::new(),
            storage_key: photo_key(album.id, "missing.jpg"),
            file_size: 0,
            width: 50,
            height: 50,
            mime_type: "image/jpeg".to_string(),
        },
    )
    .await
    .unwrap();

    let collage = generate_album_collage(&pool, &store, album.id, 40, CollageFormat::Png)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(collage.photo_count, 2);
    assert_eq!(collage.skipped_count, 1);
    assert_eq!((collage.width, collage.height), (80, 40));
    assert_eq!(collage.content_type(), "image/png");
    assert!(dir.path().join(&collage.storage_key).exists());

    let stored = Collage::get_by_id(&pool, collage.id).await.unwrap().unwrap();
    assert_eq!(stored.storage_key, collage.storage_key);
}

#[tokio::test]
async fn test_album_without_photos_yields_nothing() {
    let pool = create_in_memory_pool().await.unwrap();
    let store = MemoryMediaStore::new();

    let result = generate_album_collage(&pool, &store, 42, 100, CollageFormat::Jpeg)
        .await
        .unwrap();
    assert!(result.is_none());
    assert!(store.is_empty());
}
