//! Captured-shape HTML pages from the product site.
#![allow(dead_code)]

/// Landing page that hops to the detail page client-side via meta refresh.
pub const META_REFRESH_PAGE: &str = r#"<!DOCTYPE html>
<html><head>
<meta charset="utf-8">
<meta http-equiv="refresh" content="0; url=https://webapp.flash.co/product-details?pageId=mr7Qx2">
<title>Redirecting</title>
</head><body><p>One moment...</p></body></html>"#;

/// Landing page exposing the detail page only as a canonical link.
pub const CANONICAL_PAGE: &str = r#"<!DOCTYPE html>
<html><head>
<link rel="canonical" href="https://webapp.flash.co/product-details?pageId=cn4Lk9&amp;ref=share">
</head><body><div id="__next"></div></body></html>"#;

/// Landing page with the detail link in the body.
pub const ANCHOR_PAGE: &str = r#"<!DOCTYPE html>
<html><body>
<a href="/about">About</a>
<a href="/product-details?pageId=an8Vb1">View product</a>
</body></html>"#;

/// Landing page with no route to a detail page.
pub const DEAD_END_PAGE: &str = r#"<!DOCTYPE html>
<html><body><h1>Something went wrong</h1><a href="/">Home</a></body></html>"#;

/// Detail page carrying the product object in a streamed Next.js chunk.
pub const DETAIL_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Standing Desk</title></head><body>
<div id="__next"></div>
<script>(self.__next_f=self.__next_f||[]).push([0])</script>
<script>self.__next_f.push([1,"1:HL[\"/_next/static/css/app.css\",\"style\"]\n"])</script>
<script>self.__next_f.push([1,"5:[\"$\",\"$L1\",null,{\"initialData\":{\"productId\":\"pd-9931\",\"title\":\"Standing Desk\",\"brand\":\"Loft\",\"price\":{\"amount\":349.5,\"currency\":\"USD\"},\"images\":[\"https://cdn.example/desk-1.jpg\",\"https://cdn.example/desk-2.jpg\"],\"specs\":{\"width\":\"140cm\",\"note\":\"fits {most} rooms\"}},\"layout\":\"full\"}]\n"])</script>
</body></html>"#;

/// Detail page served before data is streamed in.
pub const EMPTY_DETAIL_PAGE: &str = r#"<!DOCTYPE html>
<html><body><div id="__next"></div>
<script>self.__next_f.push([1,"0:[\"$\",\"html\",null,{}]\n"])</script>
</body></html>"#;
